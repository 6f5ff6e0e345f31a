//! siphon-mcp: MCP session engine over SSE
//!
//! One long-lived event stream per client, RPC submitted by POST and
//! answered on the stream.

pub mod auth;
pub mod billing;
pub mod handshake;
pub mod http;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use auth::StreamAuth;
pub use billing::{BillingError, BillingGate, HttpBillingGate};
pub use handshake::HandshakeState;
pub use http::{AppState, router};
pub use server::McpServer;
pub use session::{Session, SessionStore};
pub use transport::StreamOptions;
