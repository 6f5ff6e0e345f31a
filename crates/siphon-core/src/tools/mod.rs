//! Tool registry and handler system

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::unlocker::UnlockerClient;

pub mod datasets;
pub mod group;
pub mod schema;
pub mod web;

pub use group::{DatasetDescriptor, GroupTool, TaskExecutor};
pub use schema::{FieldKind, FieldSpec, SchemaError, ToolSchema};

/// Informational cost used when a tool declares none
pub const DEFAULT_TOOL_COST: u32 = 10;

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> &ToolSchema;

    /// Advisory cost, logged only. Charging is decided by the billing backend.
    fn cost(&self) -> u32 {
        DEFAULT_TOOL_COST
    }

    /// Run the tool on arguments that already passed [`ToolSchema::validate`]
    async fn execute(&self, input: Value) -> Result<String>;
}

/// Tool listing entry
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Why a registry call did not produce a result
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] SchemaError),
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

/// Registry of available tools. Built once at startup and shared
/// read-only afterwards.
pub struct ToolRegistry {
    tools: HashMap<Arc<str>, Arc<dyn ToolHandler>>,
    order: Vec<Arc<str>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool handler. Names are unique across the registry.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let name: Arc<str> = Arc::from(handler.name());
        if self.tools.contains_key(&name) {
            bail!("Tool '{}' is already registered", name);
        }
        debug!("Registering tool: {} (cost {})", name, handler.cost());
        self.order.push(name.clone());
        self.tools.insert(name, handler);
        Ok(())
    }

    /// Get a tool by exact, case-sensitive name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|n| n.as_ref()).collect()
    }

    /// Snapshot of every tool, in registration order
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|handler| ToolDefinition {
                name: handler.name().to_string(),
                description: handler.description().to_string(),
                input_schema: handler.schema().to_json_schema(),
            })
            .collect()
    }

    /// Validate the arguments and run the named tool
    pub async fn execute(&self, tool_name: &str, input: Value) -> Result<String, ToolError> {
        let handler = self
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        let args = handler.schema().validate(input)?;
        info!(tool = tool_name, args = %args, cost = handler.cost(), "Executing tool");

        match handler.execute(args).await {
            Ok(result) => {
                debug!("Tool {} succeeded", tool_name);
                Ok(result)
            }
            Err(e) => {
                warn!("Tool {} failed: {:#}", tool_name, e);
                Err(ToolError::Failed(e))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the unlocker-backed tools and one grouped tool per
/// dataset group of the built-in catalog
pub fn standard_registry(unlocker: Arc<UnlockerClient>) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(web::SearchEngineTool::new(unlocker.clone())))?;
    registry.register(Arc::new(web::ScrapeTool::new(unlocker)))?;

    let catalog = datasets::catalog();
    for tool in group::synthesize(&catalog, datasets::executor_for) {
        registry.register(Arc::new(tool))?;
    }

    Ok(registry)
}
