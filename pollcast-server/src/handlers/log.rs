//! The `log` handler: one structured line per event.

use async_trait::async_trait;
use pollcast_core::entities::Event;
use pollcast_core::processors::{EventHandler, HandlerError, HandlerName};
use tracing::info;

pub struct LogHandler {
    name: HandlerName,
}

impl LogHandler {
    pub fn new(name: impl Into<HandlerName>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EventHandler for LogHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        info!(
            handler = %self.name,
            event_id = %event.id(),
            received_at = %event.received_at(),
            payload = %event.payload(),
            "Event received"
        );
        Ok(())
    }
}
