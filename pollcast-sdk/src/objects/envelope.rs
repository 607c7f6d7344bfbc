//! Response envelopes of the polled collection endpoint.
//!
//! A successful poll returns `{"data": [...]}` with records ordered
//! newest-first. A failed one carries a non-2xx status and
//! `{"message": "..."}`.

use serde::{Deserialize, Serialize};

/// Successful response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: Vec<T>,
}

/// Structured error body returned with a non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl ErrorBody {
    /// Best-effort extraction of the remote message.
    ///
    /// Falls back to the raw body (trimmed, at most 256 bytes on a char
    /// boundary) when it is not a structured error.
    pub fn message_from_bytes(body: &[u8]) -> String {
        if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
            return parsed.message;
        }
        let raw = String::from_utf8_lossy(body);
        let raw = raw.trim();
        let mut end = raw.len().min(256);
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        raw[..end].to_owned()
    }
}
