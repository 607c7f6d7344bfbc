//! Loop events for observing a poll client.
//!
//! # Event Flow
//!
//! A client emits `Started`, then `Seeded` once the dedup window holds the
//! first fetch. Every poll emits `Polled`, followed by one `Dispatched` per
//! new event (and a `HandlerFailed` per failing handler). Transient fetch
//! failures emit `BackingOff`. `Stopped` is always the last event of a run.

pub mod channels;
pub mod types;

pub(crate) use channels::emit;
pub use channels::{DEFAULT_CHANNEL_BUFFER, LoopEventReceiver, LoopEventSender, loop_event_channel};
pub use types::{DispatchReport, LoopEvent, LoopState};
