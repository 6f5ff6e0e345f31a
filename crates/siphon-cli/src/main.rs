//! siphon: MCP tool server over SSE
//!
//! Usage:
//!   siphon serve [--config PATH] [--port N]
//!   siphon tools [--config PATH]

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use siphon_core::{ToolRegistry, UnlockerClient, standard_registry};
use siphon_mcp::{
    AppState, BillingGate, HttpBillingGate, McpServer, SessionStore, StreamAuth, StreamOptions,
    router,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigError, HostingMode};

#[derive(Parser)]
#[command(name = "siphon", version, about = "MCP tool server over SSE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SSE server
    Serve {
        /// Config file (default: ~/.siphon/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Port to listen on, overriding config and PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the tool catalog and exit
    Tools {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = Config::load(path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_registry(config: &Config) -> Result<ToolRegistry> {
    let unlocker = UnlockerClient::new(config.api_token.clone(), config.unlocker_zone.clone())?;
    standard_registry(Arc::new(unlocker)).context("Failed to build tool registry")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.port = port;
            }
            init_logging(&config.log_level);
            serve(config).await
        }
        Commands::Tools { config } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config.log_level);
            print_tools(&build_registry(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    config.validate()?;
    if config.api_token.is_none() {
        warn!("API_TOKEN is not set; scraping tools will fail when called");
    }

    let registry = Arc::new(build_registry(&config)?);
    let tool_count = registry.len();
    let mut server = McpServer::new(registry);

    let auth = match config.hosting_mode {
        HostingMode::SelfHosted => {
            StreamAuth::Token(config.server_token.clone().ok_or(ConfigError::MissingServerToken)?)
        }
        HostingMode::Metered => {
            let url = config
                .billing_url
                .clone()
                .ok_or(ConfigError::MissingBillingUrl)?;
            let gate: Arc<dyn BillingGate> = Arc::new(HttpBillingGate::new(url)?);
            server = server.with_billing(gate.clone());
            StreamAuth::Metered(gate)
        }
    };

    let shutdown = CancellationToken::new();
    let sessions = Arc::new(SessionStore::new());
    let state = AppState {
        server: Arc::new(server),
        sessions: sessions.clone(),
        auth: Arc::new(auth),
        stream: StreamOptions {
            heartbeat: config.heartbeat(),
            endpoint_delay: config.endpoint_delay(),
            shutdown: shutdown.clone(),
            ..StreamOptions::default()
        },
    };

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        mode = %config.hosting_mode,
        tools = tool_count,
        "siphon v{} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down, closing {} sessions", sessions.count());
            shutdown.cancel();
            sessions.clear();
        })
        .await
        .context("Server error")?;

    Ok(())
}

fn print_tools(registry: &ToolRegistry) {
    for name in registry.names() {
        let Some(tool) = registry.get(name) else {
            continue;
        };
        let summary = tool.description().lines().next().unwrap_or_default();
        println!("{:<28} cost {:>3}  {}", name, tool.cost(), summary);
    }
}
