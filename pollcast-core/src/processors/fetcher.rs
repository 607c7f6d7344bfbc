//! Event sources.
//!
//! The poll loop talks to its source through the [`EventSource`] trait so
//! that the HTTP client is injected rather than owned. [`HttpFetcher`] is
//! the production implementation: one authenticated request per poll,
//! parsed into newest-first [`Event`]s.

use crate::entities::Event;
use async_trait::async_trait;
use compact_str::CompactString;
use pollcast_sdk::objects::{DataEnvelope, ErrorBody};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Boxed error used for transport-level causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while fetching a batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure (DNS, connect, TLS, timeout, truncated body).
    #[error("transport error: {0}")]
    Transient(#[source] BoxError),

    /// The API answered with a non-2xx status.
    #[error("remote API error (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// The API answered 429.
    #[error("rate limited by remote API")]
    RateLimited { retry_after: Option<Duration> },

    /// The response body does not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FetchError {
    /// Whether the poll loop should back off and retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Protocol(_))
    }

    /// Server-provided minimum delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        FetchError::Transient(Box::new(value))
    }
}

/// A source of newest-first event batches.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch the latest batch, newest first.
    async fn fetch(&self) -> Result<Vec<Event>, FetchError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String {
        "event source".to_string()
    }
}

#[async_trait]
impl<S: EventSource + ?Sized> EventSource for Arc<S> {
    async fn fetch(&self) -> Result<Vec<Event>, FetchError> {
        (**self).fetch().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Produces the `Authorization` header value for each request.
///
/// Token acquisition and refresh live behind this trait; the fetcher only
/// asks for the current value.
#[async_trait]
pub trait Credential: Send + Sync {
    async fn authorization(&self) -> Result<String, FetchError>;
}

/// A static bearer token.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken").finish_non_exhaustive()
    }
}

#[async_trait]
impl Credential for BearerToken {
    async fn authorization(&self) -> Result<String, FetchError> {
        Ok(format!("Bearer {}", self.token))
    }
}

/// HTTP method used to poll the collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMethod {
    /// Parameters are sent in the query string.
    #[default]
    Get,
    /// Parameters are sent as a flat JSON object body.
    Post,
}

/// Polls an HTTP JSON collection endpoint.
pub struct HttpFetcher {
    http: reqwest::Client,
    endpoint: Url,
    method: FetchMethod,
    params: Vec<(String, String)>,
    credential: Arc<dyn Credential>,
    id_field: CompactString,
}

impl HttpFetcher {
    /// Create a fetcher for `endpoint` authenticating with `credential`.
    ///
    /// Defaults: `GET`, no parameters, ids read from the `id` field, a
    /// 30 second request timeout.
    pub fn new(endpoint: Url, credential: impl Credential + 'static) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            endpoint,
            method: FetchMethod::default(),
            params: Vec::new(),
            credential: Arc::new(credential),
            id_field: CompactString::const_new("id"),
        }
    }

    /// Replace the default `reqwest::Client`.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn with_method(mut self, method: FetchMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a request parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Read event ids from `field` instead of `id`.
    pub fn with_id_field(mut self, field: impl Into<CompactString>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self) -> Result<reqwest::Response, FetchError> {
        let request = match self.method {
            FetchMethod::Get => self.http.get(self.endpoint.clone()).query(&self.params),
            FetchMethod::Post => {
                let body: serde_json::Map<String, serde_json::Value> = self
                    .params
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect();
                self.http.post(self.endpoint.clone()).json(&body)
            }
        };
        let authorization = self.credential.authorization().await?;
        Ok(request.header(AUTHORIZATION, authorization).send().await?)
    }
}

#[async_trait]
impl EventSource for HttpFetcher {
    async fn fetch(&self) -> Result<Vec<Event>, FetchError> {
        let response = self.send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await?;

        debug!(
            endpoint = %self.endpoint,
            status = status.as_u16(),
            bytes = body.len(),
            "Fetched event batch"
        );

        parse_response(
            status,
            retry_after,
            &body,
            &self.id_field,
            time::OffsetDateTime::now_utc(),
        )
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Read a `Retry-After` header given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classify a response and parse its `data` array into events.
pub fn parse_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &[u8],
    id_field: &str,
    received_at: time::OffsetDateTime,
) -> Result<Vec<Event>, FetchError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Err(FetchError::Remote {
            status: status.as_u16(),
            message: ErrorBody::message_from_bytes(body),
        });
    }

    let envelope: DataEnvelope<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| FetchError::Protocol(format!("invalid response body: {e}")))?;

    envelope
        .data
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            Event::from_record(record, id_field, received_at)
                .map_err(|e| FetchError::Protocol(format!("data[{index}]: {e}")))
        })
        .collect()
}
