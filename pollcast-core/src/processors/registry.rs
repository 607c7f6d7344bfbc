//! Handler registry.
//!
//! Handlers are keyed by an explicit [`HandlerName`]. Registering a name
//! that already exists replaces its handler and filter chain in place
//! (last registration wins) and keeps its position in registration order.
//!
//! The registry is shared behind an async `RwLock` so handlers can be
//! registered or removed while the poll loop is dispatching; dispatch works
//! on a [`snapshot`](HandlerRegistry::snapshot).

use super::fetcher::BoxError;
use super::filter::FilterChain;
use crate::entities::Event;
use async_trait::async_trait;
use compact_str::CompactString;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Identity of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerName(CompactString);

impl HandlerName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HandlerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerName {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for HandlerName {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

/// A handler invocation failed.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler failed: {0}")]
    Source(#[source] BoxError),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn from_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        HandlerError::Source(Box::new(error))
    }
}

/// A unit of work invoked with each event that passes its filters.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap a closure returning a future as a handler. The closure receives
/// its own (cheap) clone of the event.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// One `{name, handler, filters}` entry.
#[derive(Clone)]
pub struct Registration {
    pub name: HandlerName,
    pub handler: Arc<dyn EventHandler>,
    pub filters: FilterChain,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// Result of [`HandlerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    Added,
    /// The name already existed; its handler and filters were replaced.
    Replaced,
}

/// Ordered, shared list of handler registrations.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: Arc<RwLock<Vec<Registration>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the handler registered under `name`.
    pub async fn register(
        &self,
        name: impl Into<HandlerName>,
        handler: Arc<dyn EventHandler>,
        filters: FilterChain,
    ) -> Registered {
        let name = name.into();
        let mut entries = self.entries.write().await;
        let filter_count = filters.len();

        let outcome = match entries.iter_mut().find(|r| r.name == name) {
            Some(existing) => {
                existing.handler = handler;
                existing.filters = filters;
                Registered::Replaced
            }
            None => {
                entries.push(Registration {
                    name: name.clone(),
                    handler,
                    filters,
                });
                Registered::Added
            }
        };

        info!(handler = %name, filters = filter_count, outcome = ?outcome, "Handler registered");
        outcome
    }

    /// Remove the handler registered under `name`.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|r| r.name.as_str() != name);
        let removed = entries.len() != before;
        if removed {
            info!(handler = name, "Handler unregistered");
        }
        removed
    }

    /// Remove every handler whose name is not accepted by `keep`.
    ///
    /// Returns the removed names.
    pub async fn retain(&self, keep: impl Fn(&HandlerName) -> bool) -> Vec<HandlerName> {
        let mut entries = self.entries.write().await;
        let mut removed = Vec::new();
        entries.retain(|r| {
            let kept = keep(&r.name);
            if !kept {
                removed.push(r.name.clone());
            }
            kept
        });
        removed
    }

    /// Clone the current registrations, in registration order.
    pub async fn snapshot(&self) -> Vec<Registration> {
        self.entries.read().await.clone()
    }

    pub async fn names(&self) -> Vec<HandlerName> {
        self.entries
            .read()
            .await
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .await
            .iter()
            .any(|r| r.name.as_str() == name)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
