//! Status API response types.

use serde::{Deserialize, Serialize};

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Poll loop state as reported by the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStateName {
    Stopped,
    Running,
}

impl std::fmt::Display for LoopStateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopStateName::Stopped => write!(f, "stopped"),
            LoopStateName::Running => write!(f, "running"),
        }
    }
}

/// `GET /api/v1/status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: LoopStateName,
    pub interval_ms: u64,
    /// Registered handler names in registration order.
    pub handlers: Vec<String>,
    /// Dedup window contents, most recent first.
    pub window: Vec<String>,
    pub polls: u64,
    pub events_dispatched: u64,
    pub handler_failures: u64,
    pub backoffs: u64,
    pub last_poll_at: Option<i64>,
    pub last_error: Option<String>,
}

/// One frame of the `GET /api/v1/events` server-sent event stream.
///
/// Serialized internally tagged on `"type"`:
///
/// ```json
/// {"type":"dispatched","event_id":"42","delivered":2,"filtered":0,"failed":0}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Started,
    Seeded {
        known: usize,
    },
    Polled {
        fetched: usize,
        fresh: usize,
    },
    Dispatched {
        event_id: String,
        delivered: u32,
        filtered: u32,
        failed: u32,
    },
    HandlerFailed {
        handler: String,
        event_id: String,
        reason: String,
    },
    BackingOff {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    Stopped {
        fatal: Option<String>,
    },
}

impl StreamEvent {
    /// SSE `event:` name for this frame.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Started => "started",
            StreamEvent::Seeded { .. } => "seeded",
            StreamEvent::Polled { .. } => "polled",
            StreamEvent::Dispatched { .. } => "dispatched",
            StreamEvent::HandlerFailed { .. } => "handler_failed",
            StreamEvent::BackingOff { .. } => "backing_off",
            StreamEvent::Stopped { .. } => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_wire_format() {
        let frame = StreamEvent::BackingOff {
            attempt: 2,
            delay_ms: 5000,
            reason: "transport error".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "backing_off");
        assert_eq!(json["delay_ms"], 5000);
        assert_eq!(frame.name(), "backing_off");
    }
}
