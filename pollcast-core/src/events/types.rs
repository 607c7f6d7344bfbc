//! Loop event type definitions.
//!
//! Loop events are the observability side channel of a poll client. They
//! are informational copies: dropping or missing one never affects
//! delivery.

use crate::entities::EventId;
use crate::processors::registry::HandlerName;
use pollcast_sdk::objects::{LoopStateName, StreamEvent};
use std::time::Duration;

/// Lifecycle state of a poll client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoopState {
    #[default]
    Stopped,
    Running,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Stopped => write!(f, "stopped"),
            LoopState::Running => write!(f, "running"),
        }
    }
}

impl From<LoopState> for LoopStateName {
    fn from(value: LoopState) -> Self {
        match value {
            LoopState::Stopped => LoopStateName::Stopped,
            LoopState::Running => LoopStateName::Running,
        }
    }
}

/// Outcome counts of dispatching one event to the registered handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_id: EventId,
    /// Handlers whose filters passed and which completed successfully.
    pub delivered: u32,
    /// Handlers whose filter chain did not match.
    pub filtered: u32,
    /// Handlers that failed (handler error, filter error, panic or timeout).
    pub failed: u32,
}

impl DispatchReport {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            delivered: 0,
            filtered: 0,
            failed: 0,
        }
    }
}

/// Events emitted by a running poll client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// The client transitioned to `Running`.
    Started,
    /// The dedup window was seeded from the first fetch.
    Seeded { known: usize },
    /// A poll completed.
    Polled { fetched: usize, fresh: usize },
    /// One event was dispatched to all handlers.
    Dispatched(DispatchReport),
    /// One handler failed for one event.
    HandlerFailed {
        handler: HandlerName,
        event_id: EventId,
        reason: String,
    },
    /// A transient fetch failure; the loop waits `delay` and retries.
    BackingOff {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// The client transitioned to `Stopped`. `fatal` is set when the loop
    /// died on a non-retryable error.
    Stopped { fatal: Option<String> },
}

impl From<LoopEvent> for StreamEvent {
    fn from(value: LoopEvent) -> Self {
        match value {
            LoopEvent::Started => StreamEvent::Started,
            LoopEvent::Seeded { known } => StreamEvent::Seeded { known },
            LoopEvent::Polled { fetched, fresh } => StreamEvent::Polled { fetched, fresh },
            LoopEvent::Dispatched(report) => StreamEvent::Dispatched {
                event_id: report.event_id.to_string(),
                delivered: report.delivered,
                filtered: report.filtered,
                failed: report.failed,
            },
            LoopEvent::HandlerFailed {
                handler,
                event_id,
                reason,
            } => StreamEvent::HandlerFailed {
                handler: handler.to_string(),
                event_id: event_id.to_string(),
                reason,
            },
            LoopEvent::BackingOff {
                attempt,
                delay,
                reason,
            } => StreamEvent::BackingOff {
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason,
            },
            LoopEvent::Stopped { fatal } => StreamEvent::Stopped { fatal },
        }
    }
}
