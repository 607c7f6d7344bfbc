//! Filter predicates and chains.
//!
//! A [`FilterChain`] gates one handler registration. Predicates run in
//! order and the chain stops at the first one that returns `false`. A
//! predicate that errors makes the whole dispatch for that handler fail;
//! it is never read as "did not match".

use crate::entities::Event;
use async_trait::async_trait;
use smallvec::SmallVec;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// A predicate could not be evaluated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("filter error: {message}")]
pub struct FilterError {
    pub message: String,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A boolean check gating whether a handler runs for an event.
///
/// Implementations should be free of side effects.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn matches(&self, event: &Event) -> Result<bool, FilterError>;
}

struct SyncPredicate<F>(F);

#[async_trait]
impl<F> Filter for SyncPredicate<F>
where
    F: Fn(&Event) -> Result<bool, FilterError> + Send + Sync,
{
    async fn matches(&self, event: &Event) -> Result<bool, FilterError> {
        (self.0)(event)
    }
}

struct AsyncPredicate<F>(F);

#[async_trait]
impl<F, Fut> Filter for AsyncPredicate<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, FilterError>> + Send + 'static,
{
    async fn matches(&self, event: &Event) -> Result<bool, FilterError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an infallible synchronous closure.
pub fn predicate<F>(f: F) -> Arc<dyn Filter>
where
    F: Fn(&Event) -> bool + Send + Sync + 'static,
{
    Arc::new(SyncPredicate(move |event: &Event| {
        Ok::<bool, FilterError>(f(event))
    }))
}

/// Wrap a fallible synchronous closure.
pub fn try_predicate<F>(f: F) -> Arc<dyn Filter>
where
    F: Fn(&Event) -> Result<bool, FilterError> + Send + Sync + 'static,
{
    Arc::new(SyncPredicate(f))
}

/// Wrap a closure returning a future. The closure receives its own
/// (cheap) clone of the event.
pub fn async_predicate<F, Fut>(f: F) -> Arc<dyn Filter>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, FilterError>> + Send + 'static,
{
    Arc::new(AsyncPredicate(f))
}

/// An ordered list of predicates; empty matches everything.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: SmallVec<[Arc<dyn Filter>; 4]>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a predicate (builder style).
    pub fn with(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Evaluate the chain, stopping at the first `false` or error.
    pub async fn matches(&self, event: &Event) -> Result<bool, FilterError> {
        for filter in &self.filters {
            if !filter.matches(event).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl FromIterator<Arc<dyn Filter>> for FilterChain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Filter>>>(iter: I) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("len", &self.filters.len())
            .finish()
    }
}
