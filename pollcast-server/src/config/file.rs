//! TOML file configuration structures.
//!
//! These structs directly map to the `pollcast.toml` file format.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port the status API listens on.
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// The polled collection endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub method: SourceMethod,
    /// Query parameters (GET) or JSON body fields (POST).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Record field holding the event id.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Bearer token. `POLLCAST_API_TOKEN` takes precedence when set.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMethod {
    #[default]
    Get,
    Post,
}

/// Poll loop tuning. Reloaded on SIGHUP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default)]
    pub dedup: DedupMode,
    #[serde(default)]
    pub backoff: BackoffSection,
    /// Upper bound for one handler invocation.
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            window_capacity: default_window_capacity(),
            dedup: DedupMode::default(),
            backoff: BackoffSection::default(),
            handler_timeout_ms: None,
        }
    }
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_window_capacity() -> usize {
    10
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    #[default]
    FullScan,
    StopAtFirstKnown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSection {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for BackoffSection {
    fn default() -> Self {
        BackoffSection::Fixed { delay_ms: 5_000 }
    }
}

/// One `[[handlers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Unique handler name; re-using a name replaces the handler.
    pub name: String,
    pub kind: HandlerKind,
    /// Target URL for `webhook` handlers.
    #[serde(default)]
    pub url: Option<Url>,
    /// HMAC secret for `webhook` handlers.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Log,
    Webhook,
}

/// A `[[handlers.filters]]` entry: a JSON pointer and exactly one operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// JSON pointer into the event record, e.g. `/type` or `/data/amount`.
    pub field: String,
    #[serde(default)]
    pub equals: Option<serde_json::Value>,
    #[serde(default)]
    pub one_of: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub at_least: Option<Decimal>,
    #[serde(default)]
    pub at_most: Option<Decimal>,
    #[serde(default)]
    pub contains: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:9000"

[source]
endpoint = "https://api.example.com/v1/events"
method = "post"
id_field = "uuid"

[source.params]
limit = "25"

[poll]
interval_ms = 1500
window_capacity = 50
dedup = "stop_at_first_known"
handler_timeout_ms = 10000

[poll.backoff]
kind = "exponential"
base_ms = 1000
max_ms = 60000

[[handlers]]
name = "audit"
kind = "log"

[[handlers]]
name = "paid-orders"
kind = "webhook"
url = "https://hooks.example.com/orders"
secret = "whsec"

[[handlers.filters]]
field = "/type"
equals = "order.paid"

[[handlers.filters]]
field = "/amount"
at_least = "100.50"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.source.method, SourceMethod::Post);
        assert_eq!(config.source.params.get("limit").map(String::as_str), Some("25"));
        assert_eq!(config.poll.dedup, DedupMode::StopAtFirstKnown);
        assert_eq!(
            config.poll.backoff,
            BackoffSection::Exponential {
                base_ms: 1000,
                max_ms: 60000
            }
        );
        assert_eq!(config.handlers.len(), 2);
        assert_eq!(config.handlers[1].kind, HandlerKind::Webhook);
        assert_eq!(config.handlers[1].filters.len(), 2);
        assert_eq!(
            config.handlers[1].filters[0].equals,
            Some(serde_json::json!("order.paid"))
        );
        assert_eq!(
            config.handlers[1].filters[1].at_least,
            Some(Decimal::new(10050, 2))
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_str = r#"
[source]
endpoint = "https://api.example.com/v1/events"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, default_listen_addr());
        assert_eq!(config.source.method, SourceMethod::Get);
        assert_eq!(config.source.id_field, "id");
        assert!(config.source.token.is_none());
        assert_eq!(config.poll.interval_ms, 2_000);
        assert_eq!(config.poll.window_capacity, 10);
        assert_eq!(config.poll.backoff, BackoffSection::Fixed { delay_ms: 5_000 });
        assert!(config.handlers.is_empty());
    }

    #[test]
    fn test_unknown_handler_kind_is_rejected() {
        let toml_str = r#"
[source]
endpoint = "https://api.example.com/v1/events"

[[handlers]]
name = "x"
kind = "carrier-pigeon"
"#;
        assert!(toml::from_str::<FileConfig>(toml_str).is_err());
    }
}
