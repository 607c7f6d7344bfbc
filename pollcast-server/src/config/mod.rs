//! Configuration module for pollcast-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::{
    BackoffSection, DedupMode, FileConfig, HandlerConfig, HandlerKind, ServerConfig, SourceMethod,
};
use crate::handlers::FieldFilter;
use pollcast_core::config::{BackoffPolicy, DedupStrategy, PollConfig};
use pollcast_core::processors::FetchMethod;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the bearer token for the polled API.
pub const API_TOKEN_ENV: &str = "POLLCAST_API_TOKEN";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("no API token: set {API_TOKEN_ENV} or source.token")]
    MissingApiToken,
}

/// Settings for the polled endpoint.
#[derive(Clone)]
pub struct SourceSettings {
    pub endpoint: Url,
    pub method: FetchMethod,
    pub params: Vec<(String, String)>,
    pub id_field: String,
    pub token: String,
}

impl std::fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSettings")
            .field("endpoint", &self.endpoint.as_str())
            .field("method", &self.method)
            .field("params", &self.params)
            .field("id_field", &self.id_field)
            .finish_non_exhaustive()
    }
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub source: SourceSettings,
    pub poll: PollConfig,
    pub handlers: Vec<HandlerConfig>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Resolve the API token (environment first, then file)
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_from_str(&config_content, get_api_token())
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn load_from_str(
        &self,
        content: &str,
        env_token: Option<String>,
    ) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        let token = env_token
            .or_else(|| file_config.source.token.clone())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingApiToken)?;

        build_loaded_config(file_config, token)
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.poll.interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "poll.interval_ms must be greater than zero".to_string(),
        ));
    }
    if config.poll.window_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "poll.window_capacity must be greater than zero".to_string(),
        ));
    }
    if matches!(config.poll.backoff, BackoffSection::Exponential { base_ms, max_ms } if base_ms > max_ms)
    {
        return Err(ConfigError::ValidationError(
            "poll.backoff.base_ms must not exceed max_ms".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for handler in &config.handlers {
        if !names.insert(handler.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate handler name {:?}",
                handler.name
            )));
        }
        if handler.kind == HandlerKind::Webhook && (handler.url.is_none() || handler.secret.is_none())
        {
            return Err(ConfigError::ValidationError(format!(
                "webhook handler {:?} needs both url and secret",
                handler.name
            )));
        }
        for filter in &handler.filters {
            FieldFilter::from_config(filter).map_err(|e| {
                ConfigError::ValidationError(format!("handler {:?}: {e}", handler.name))
            })?;
        }
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig, token: String) -> Result<LoadedConfig, ConfigError> {
    let source = file_config.source;
    let poll = &file_config.poll;

    let window_capacity = NonZeroUsize::new(poll.window_capacity).ok_or_else(|| {
        ConfigError::ValidationError("poll.window_capacity must be greater than zero".to_string())
    })?;

    Ok(LoadedConfig {
        server: file_config.server,
        source: SourceSettings {
            endpoint: source.endpoint,
            method: match source.method {
                SourceMethod::Get => FetchMethod::Get,
                SourceMethod::Post => FetchMethod::Post,
            },
            params: source.params.into_iter().collect(),
            id_field: source.id_field,
            token,
        },
        poll: PollConfig {
            interval: Duration::from_millis(poll.interval_ms),
            backoff: match poll.backoff {
                BackoffSection::Fixed { delay_ms } => {
                    BackoffPolicy::Fixed(Duration::from_millis(delay_ms))
                }
                BackoffSection::Exponential { base_ms, max_ms } => BackoffPolicy::Exponential {
                    base: Duration::from_millis(base_ms),
                    max: Duration::from_millis(max_ms),
                },
            },
            window_capacity,
            dedup: match poll.dedup {
                DedupMode::FullScan => DedupStrategy::FullScan,
                DedupMode::StopAtFirstKnown => DedupStrategy::StopAtFirstKnown,
            },
            handler_timeout: poll.handler_timeout_ms.map(Duration::from_millis),
        },
        handlers: file_config.handlers,
    })
}

/// Get the API token from the environment.
pub fn get_api_token() -> Option<String> {
    std::env::var(API_TOKEN_ENV).ok()
}
