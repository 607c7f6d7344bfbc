//! Webhook payload for forwarded events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signature::Signature;

/// Body POSTed by the `webhook` handler for every event it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventForwardedPayload {
    pub event_type: String,
    /// Unique per delivery attempt.
    pub delivery_id: Uuid,
    pub event_id: String,
    /// Unix timestamp at which the poller received the event.
    pub received_at: i64,
    /// The record exactly as returned by the polled API.
    pub event: serde_json::Value,
}

impl EventForwardedPayload {
    pub const EVENT_TYPE: &'static str = "event_received";
}

impl Signature for EventForwardedPayload {}
