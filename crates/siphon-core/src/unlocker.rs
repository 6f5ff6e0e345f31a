//! Client for the web-unlocker request API

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// Default unlocker request endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.brightdata.com/request";

/// Fetches pages through the unlocker proxy zone
#[derive(Clone)]
pub struct UnlockerClient {
    client: Client,
    api_token: Option<String>,
    zone: String,
    endpoint: String,
}

impl std::fmt::Debug for UnlockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockerClient")
            .field("api_token", &"[REDACTED]")
            .field("zone", &self.zone)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Request body for the unlocker API
#[derive(Debug, Serialize)]
struct UnlockRequest<'a> {
    url: &'a str,
    zone: &'a str,
    format: &'static str,
    data_format: &'a str,
}

impl UnlockerClient {
    /// Create a client for the given zone. Requests carry no timeout of
    /// their own; the HTTP stack's defaults apply.
    pub fn new(api_token: Option<String>, zone: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("siphon/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_token,
            zone: zone.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// Point the client at a different request endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Fetch `url` and return the body rendered as `data_format`
    /// (`markdown` or `html`)
    pub async fn fetch(&self, url: &str, data_format: &str) -> Result<String> {
        let request = UnlockRequest {
            url,
            zone: &self.zone,
            format: "raw",
            data_format,
        };

        debug!(url = url, zone = %self.zone, data_format = data_format, "Unlocker request");

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send unlocker request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Unlocker request failed with status {status}: {body}");
        }

        response
            .text()
            .await
            .context("Failed to read unlocker response")
    }
}
