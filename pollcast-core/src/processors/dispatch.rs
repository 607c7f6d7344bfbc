//! DispatchEngine processor.
//!
//! Delivers one event to every registered handler whose filter chain
//! matches. Each registration runs in its own task, so a handler that
//! errors, panics or hangs past the configured timeout only fails its own
//! delivery. Every task for an event is joined before `process` returns,
//! which keeps delivery across events in order.

use super::filter::FilterError;
use super::registry::{HandlerError, HandlerName, HandlerRegistry, Registration};
use crate::config::{ConfigStore, PollConfig};
use crate::entities::Event;
use crate::events::{DispatchReport, LoopEvent, LoopEventSender, emit};
use futures_util::FutureExt;
use kanau::processor::Processor;
use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Why a single handler did not complete for an event.
#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
}

/// Result of running one registration against one event.
#[derive(Debug)]
pub enum Outcome {
    Delivered,
    Filtered,
    Failed(DispatchFailure),
}

/// Fans an event out to the handlers in a [`HandlerRegistry`].
pub struct DispatchEngine {
    registry: HandlerRegistry,
    config: ConfigStore<PollConfig>,
    events_tx: LoopEventSender,
}

impl DispatchEngine {
    pub fn new(
        registry: HandlerRegistry,
        config: ConfigStore<PollConfig>,
        events_tx: LoopEventSender,
    ) -> Self {
        Self {
            registry,
            config,
            events_tx,
        }
    }

    /// Run every registration against `event` and collect the outcomes in
    /// registration order.
    pub async fn dispatch(&self, event: &Event) -> Vec<(HandlerName, Outcome)> {
        let registrations = self.registry.snapshot().await;
        let timeout = self.config.read().await.handler_timeout;

        let mut tasks = JoinSet::new();
        for (index, registration) in registrations.iter().cloned().enumerate() {
            let event = event.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(run_one(registration, event, timeout))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Outcome::Failed(DispatchFailure::Panicked(panic_message(payload)))
                    });
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Outcome>> = registrations.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(outcome);
                    }
                }
                // Only reachable if the runtime cancels the task.
                Err(e) => warn!(error = %e, "Dispatch task did not complete"),
            }
        }

        registrations
            .into_iter()
            .zip(slots)
            .map(|(registration, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    Outcome::Failed(DispatchFailure::Panicked("task cancelled".to_string()))
                });
                (registration.name, outcome)
            })
            .collect()
    }
}

async fn run_one(registration: Registration, event: Event, timeout: Option<Duration>) -> Outcome {
    let work = async {
        if !registration.filters.matches(&event).await? {
            return Ok::<bool, DispatchFailure>(false);
        }
        registration.handler.handle(&event).await?;
        Ok(true)
    };

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(DispatchFailure::TimedOut(limit)),
        },
        None => work.await,
    };

    match result {
        Ok(true) => Outcome::Delivered,
        Ok(false) => Outcome::Filtered,
        Err(failure) => Outcome::Failed(failure),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Processor<Event> for DispatchEngine {
    type Output = DispatchReport;
    type Error = Infallible;

    async fn process(&self, event: Event) -> Result<DispatchReport, Infallible> {
        let mut report = DispatchReport::new(event.id().clone());

        for (handler, outcome) in self.dispatch(&event).await {
            match outcome {
                Outcome::Delivered => report.delivered += 1,
                Outcome::Filtered => report.filtered += 1,
                Outcome::Failed(failure) => {
                    report.failed += 1;
                    warn!(
                        handler = %handler,
                        event_id = %event.id(),
                        error = %failure,
                        "Handler failed"
                    );
                    emit(
                        &self.events_tx,
                        LoopEvent::HandlerFailed {
                            handler,
                            event_id: event.id().clone(),
                            reason: failure.to_string(),
                        },
                    );
                }
            }
        }

        debug!(
            event_id = %report.event_id,
            delivered = report.delivered,
            filtered = report.filtered,
            failed = report.failed,
            "Event dispatched"
        );
        emit(&self.events_tx, LoopEvent::Dispatched(report.clone()));
        Ok(report)
    }
}
