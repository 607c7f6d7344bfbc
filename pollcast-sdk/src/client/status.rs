//! Status API client (operator tooling → pollcast-server).

use reqwest::Client;
use url::Url;

use super::ClientError;
use crate::objects::status::{HealthResponse, StatusResponse};

/// Typed HTTP client for the pollcast **status API**.
#[derive(Debug, Clone)]
pub struct StatusClient {
    http: Client,
    base_url: Url,
}

impl StatusClient {
    /// Create a new `StatusClient` for the server at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one (e.g. to
    /// configure timeouts or a proxy).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let url = self.base_url.join("/health")?;
        let resp = self.http.get(url).send().await?;
        parse_response(resp).await
    }

    /// `GET /api/v1/status` – loop state, handlers, dedup window and
    /// counters.
    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        let url = self.base_url.join("/api/v1/status")?;
        let resp = self.http.get(url).send().await?;
        parse_response(resp).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
