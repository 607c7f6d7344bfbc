//! Loop event channel factory and handles.

use super::types::LoopEvent;
use tokio::sync::broadcast;

/// Default buffer size for the loop event channel.
///
/// Subscribers that fall further behind than this observe
/// `RecvError::Lagged` and skip ahead.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for loop events.
pub type LoopEventSender = broadcast::Sender<LoopEvent>;
/// Receiver handle for loop events.
pub type LoopEventReceiver = broadcast::Receiver<LoopEvent>;

/// Create a new loop event channel.
///
/// The initial receiver is dropped; subscribe through the sender (or
/// `PollClient::subscribe`). Sending with no subscribers is not an error
/// for emitters.
pub fn loop_event_channel() -> LoopEventSender {
    let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_BUFFER);
    tx
}

/// Publish `event`, ignoring the absence of subscribers.
pub(crate) fn emit(tx: &LoopEventSender, event: LoopEvent) {
    let _ = tx.send(event);
}
