//! siphon-core: tool catalog for the siphon MCP server
//!
//! Holds the tool registry, the typed parameter schemas, the grouped
//! dataset tools and the unlocker client the standalone tools fetch through.

pub mod tools;
pub mod unlocker;

pub use tools::{
    DatasetDescriptor, FieldKind, FieldSpec, GroupTool, SchemaError, TaskExecutor, ToolDefinition,
    ToolError, ToolHandler, ToolRegistry, ToolSchema, standard_registry,
};
pub use unlocker::UnlockerClient;
