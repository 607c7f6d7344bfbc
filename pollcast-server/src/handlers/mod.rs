//! Built-in handlers and filters, and their construction from config.

pub mod field_filter;
pub mod log;
pub mod webhook;

pub use field_filter::{FieldCondition, FieldFilter, FilterConfigError};
pub use log::LogHandler;
pub use webhook::WebhookForwarder;

use crate::config::ConfigError;
use crate::config::file::{HandlerConfig, HandlerKind};
use pollcast_core::PollClient;
use pollcast_core::processors::{EventHandler, Filter, FilterChain};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// A handler ready to be registered.
pub struct HandlerSetup {
    pub name: String,
    pub handler: Arc<dyn EventHandler>,
    pub filters: FilterChain,
}

/// Build the handler and filter chain described by one `[[handlers]]` entry.
pub fn build(config: &HandlerConfig, http: &reqwest::Client) -> Result<HandlerSetup, ConfigError> {
    let handler: Arc<dyn EventHandler> = match config.kind {
        HandlerKind::Log => Arc::new(LogHandler::new(config.name.as_str())),
        HandlerKind::Webhook => {
            let (Some(url), Some(secret)) = (&config.url, &config.secret) else {
                return Err(ConfigError::ValidationError(format!(
                    "webhook handler {:?} needs both url and secret",
                    config.name
                )));
            };
            Arc::new(WebhookForwarder::new(http.clone(), url.clone(), secret))
        }
    };

    let filters = config
        .filters
        .iter()
        .map(|f| {
            FieldFilter::from_config(f)
                .map(|filter| Arc::new(filter) as Arc<dyn Filter>)
                .map_err(|e| {
                    ConfigError::ValidationError(format!("handler {:?}: {e}", config.name))
                })
        })
        .collect::<Result<FilterChain, _>>()?;

    Ok(HandlerSetup {
        name: config.name.clone(),
        handler,
        filters,
    })
}

/// Make the client's registry match `configs`.
///
/// Everything is built before the registry is touched, so an invalid entry
/// leaves the running handlers unchanged. Existing names are replaced in
/// place; names no longer configured are unregistered.
pub async fn apply(
    client: &PollClient,
    configs: &[HandlerConfig],
    http: &reqwest::Client,
) -> Result<(), ConfigError> {
    let setups = configs
        .iter()
        .map(|c| build(c, http))
        .collect::<Result<Vec<_>, _>>()?;

    let wanted: HashSet<String> = setups.iter().map(|s| s.name.clone()).collect();
    for setup in setups {
        client
            .register_handler(setup.name, setup.handler, setup.filters)
            .await;
    }

    let removed = client
        .registry()
        .retain(|name| wanted.contains(name.as_str()))
        .await;
    for name in &removed {
        info!(handler = %name, "Handler removed from configuration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::FilterConfig;
    use async_trait::async_trait;
    use pollcast_core::PollConfig;
    use pollcast_core::entities::Event;
    use pollcast_core::processors::{EventSource, FetchError};
    use serde_json::json;

    struct Idle;

    #[async_trait]
    impl EventSource for Idle {
        async fn fetch(&self) -> Result<Vec<Event>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn log_handler(name: &str) -> HandlerConfig {
        HandlerConfig {
            name: name.to_string(),
            kind: HandlerKind::Log,
            url: None,
            secret: None,
            filters: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_apply_replaces_and_removes() {
        let client = PollClient::new(Idle, PollConfig::default());
        let http = reqwest::Client::new();

        apply(&client, &[log_handler("a"), log_handler("b")], &http)
            .await
            .unwrap();
        assert_eq!(client.registry().len().await, 2);

        let mut filtered = log_handler("b");
        filtered.filters.push(FilterConfig {
            field: "/type".to_string(),
            equals: Some(json!("order.paid")),
            ..FilterConfig::default()
        });
        apply(&client, &[filtered, log_handler("c")], &http)
            .await
            .unwrap();

        let snapshot = client.registry().snapshot().await;
        let names: Vec<&str> = snapshot.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
        assert_eq!(snapshot[0].filters.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_entry_leaves_registry_untouched() {
        let client = PollClient::new(Idle, PollConfig::default());
        let http = reqwest::Client::new();
        apply(&client, &[log_handler("a")], &http).await.unwrap();

        let broken = HandlerConfig {
            kind: HandlerKind::Webhook,
            ..log_handler("hook")
        };
        assert!(apply(&client, &[broken], &http).await.is_err());
        assert!(client.registry().contains("a").await);
    }
}
