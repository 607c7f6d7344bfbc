//! Event records produced by a poll.

use compact_str::{CompactString, ToCompactString};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Opaque event identifier.
///
/// The polled API may use either JSON strings or integers; both normalize to
/// their textual form so `42` and `"42"` refer to the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(CompactString);

impl EventId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    /// Extract an id from a JSON value. Only strings and integers qualify.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.to_compact_string())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_compact_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        Self(value.to_compact_string())
    }
}

/// Reasons a raw record cannot become an [`Event`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no `{0}` field")]
    MissingId(CompactString),

    #[error("record field `{0}` is not a string or integer id")]
    InvalidId(CompactString),
}

/// One occurrence retrieved from the remote source.
///
/// Immutable once built. The payload is shared so that fanning an event out
/// to many handlers does not copy the JSON tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    payload: Arc<Value>,
    received_at: time::OffsetDateTime,
}

impl Event {
    /// Build an event received now.
    pub fn new(id: impl Into<EventId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload: Arc::new(payload),
            received_at: time::OffsetDateTime::now_utc(),
        }
    }

    /// Parse a raw API record, reading the id from `id_field`.
    pub fn from_record(
        record: Value,
        id_field: &str,
        received_at: time::OffsetDateTime,
    ) -> Result<Self, RecordError> {
        let Value::Object(map) = &record else {
            return Err(RecordError::NotAnObject);
        };
        let raw_id = map
            .get(id_field)
            .ok_or_else(|| RecordError::MissingId(id_field.into()))?;
        let id = EventId::from_json(raw_id).ok_or_else(|| RecordError::InvalidId(id_field.into()))?;
        Ok(Self {
            id,
            payload: Arc::new(record),
            received_at,
        })
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// The record exactly as returned by the API.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn received_at(&self) -> time::OffsetDateTime {
        self.received_at
    }

    /// Look up a payload field by JSON pointer (e.g. `/amount`).
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        self.payload.pointer(pointer)
    }
}
