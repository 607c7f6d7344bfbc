//! Application state shared across all request handlers.

use pollcast_core::PollClient;
use pollcast_core::events::{LoopEvent, LoopEventReceiver};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub client: PollClient,
    pub status: StatusTracker,
}

impl AppState {
    pub fn new(client: PollClient) -> Self {
        Self {
            client,
            status: StatusTracker::default(),
        }
    }
}

/// Counters derived from the loop event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopCounters {
    pub polls: u64,
    pub events_dispatched: u64,
    pub handler_failures: u64,
    pub backoffs: u64,
    pub last_poll_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Folds loop events into [`LoopCounters`] for the status endpoint.
#[derive(Clone, Default)]
pub struct StatusTracker {
    counters: Arc<RwLock<LoopCounters>>,
}

impl StatusTracker {
    pub async fn record(&self, event: &LoopEvent) {
        let mut counters = self.counters.write().await;
        match event {
            LoopEvent::Started | LoopEvent::Seeded { .. } => {}
            LoopEvent::Polled { .. } => {
                counters.polls += 1;
                counters.last_poll_at = Some(time::OffsetDateTime::now_utc().unix_timestamp());
            }
            LoopEvent::Dispatched(_) => counters.events_dispatched += 1,
            LoopEvent::HandlerFailed {
                handler, reason, ..
            } => {
                counters.handler_failures += 1;
                counters.last_error = Some(format!("{handler}: {reason}"));
            }
            LoopEvent::BackingOff { reason, .. } => {
                counters.backoffs += 1;
                counters.last_error = Some(reason.clone());
            }
            LoopEvent::Stopped { fatal } => {
                if let Some(reason) = fatal {
                    counters.last_error = Some(reason.clone());
                }
            }
        }
    }

    pub async fn snapshot(&self) -> LoopCounters {
        self.counters.read().await.clone()
    }

    /// Consume `rx` until the channel closes.
    pub fn spawn(&self, mut rx: LoopEventReceiver) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => tracker.record(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Status tracker lagged behind loop events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Status tracker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollcast_core::events::DispatchReport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_counters_follow_events() {
        let tracker = StatusTracker::default();
        for event in [
            LoopEvent::Started,
            LoopEvent::Polled {
                fetched: 3,
                fresh: 1,
            },
            LoopEvent::Dispatched(DispatchReport::new("7".into())),
            LoopEvent::HandlerFailed {
                handler: "hook".into(),
                event_id: "7".into(),
                reason: "status 500".to_string(),
            },
            LoopEvent::BackingOff {
                attempt: 1,
                delay: Duration::from_secs(5),
                reason: "connection reset".to_string(),
            },
        ] {
            tracker.record(&event).await;
        }

        let counters = tracker.snapshot().await;
        assert_eq!(counters.polls, 1);
        assert_eq!(counters.events_dispatched, 1);
        assert_eq!(counters.handler_failures, 1);
        assert_eq!(counters.backoffs, 1);
        assert!(counters.last_poll_at.is_some());
        assert_eq!(counters.last_error.as_deref(), Some("connection reset"));
    }
}
