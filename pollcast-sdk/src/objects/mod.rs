pub mod envelope;
pub mod status;
pub mod webhook;

pub use envelope::{DataEnvelope, ErrorBody};
pub use status::{HealthResponse, LoopStateName, StatusResponse, StreamEvent};
pub use webhook::EventForwardedPayload;
