//! Standalone tools that fetch pages through the unlocker API

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::ToolHandler;
use super::schema::{FieldSpec, ToolSchema};
use crate::unlocker::UnlockerClient;

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing '{}' parameter", field))
}

/// Search engine results page scraper
pub struct SearchEngineTool {
    client: Arc<UnlockerClient>,
    schema: ToolSchema,
}

impl SearchEngineTool {
    pub fn new(client: Arc<UnlockerClient>) -> Self {
        let schema = ToolSchema::new().field(FieldSpec::string("query")).field(
            FieldSpec::string("engine")
                .optional()
                .one_of(["google", "bing", "yandex"])
                .default_value("google"),
        );
        Self { client, schema }
    }

    /// Results page URL for a query
    pub fn search_url(engine: &str, query: &str) -> Result<url::Url> {
        let base = format!("https://{engine}.com/search");
        url::Url::parse_with_params(&base, &[("q", query)])
            .map_err(|e| anyhow!("Invalid search URL for engine '{}': {}", engine, e))
    }
}

#[async_trait]
impl ToolHandler for SearchEngineTool {
    fn name(&self) -> &str {
        "search_engine"
    }

    fn description(&self) -> &str {
        "Scrape search results from Google, Bing or Yandex."
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn cost(&self) -> u32 {
        25
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let query = required_str(&input, "query")?;
        let engine = input
            .get("engine")
            .and_then(|v| v.as_str())
            .unwrap_or("google");

        let url = Self::search_url(engine, query)?;
        debug!("Search engine: '{}' via {}", query, engine);
        self.client.fetch(url.as_str(), "markdown").await
    }
}

/// Single page scraper
pub struct ScrapeTool {
    client: Arc<UnlockerClient>,
    schema: ToolSchema,
}

impl ScrapeTool {
    pub fn new(client: Arc<UnlockerClient>) -> Self {
        let schema = ToolSchema::new().field(FieldSpec::url("url")).field(
            FieldSpec::string("format")
                .optional()
                .one_of(["markdown", "html"])
                .default_value("markdown"),
        );
        Self { client, schema }
    }
}

#[async_trait]
impl ToolHandler for ScrapeTool {
    fn name(&self) -> &str {
        "scrape"
    }

    fn description(&self) -> &str {
        "Scrape a single webpage URL, returning content in markdown or HTML."
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn cost(&self) -> u32 {
        15
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let url = required_str(&input, "url")?;
        let format = input
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("markdown");

        debug!("Scrape: {} as {}", url, format);
        self.client.fetch(url, format).await
    }
}
