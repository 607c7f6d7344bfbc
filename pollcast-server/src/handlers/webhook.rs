//! The `webhook` handler: forwards each event as a signed JSON POST.
//!
//! The body is an [`EventForwardedPayload`]; the `Pollcast-Signature` header
//! carries `{timestamp}.{base64(HMAC-SHA256("{timestamp}.{body}", secret))}`
//! so receivers can check it with `pollcast_sdk::client::verify_webhook`.

use async_trait::async_trait;
use pollcast_core::entities::Event;
use pollcast_core::processors::{EventHandler, HandlerError};
use pollcast_sdk::objects::EventForwardedPayload;
use pollcast_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Longest response body quoted in a delivery error.
const MAX_ERROR_BODY: usize = 256;

pub struct WebhookForwarder {
    http: reqwest::Client,
    url: Url,
    secret: Box<[u8]>,
}

impl WebhookForwarder {
    pub fn new(http: reqwest::Client, url: Url, secret: impl AsRef<[u8]>) -> Self {
        Self {
            http,
            url,
            secret: secret.as_ref().into(),
        }
    }

    fn payload(event: &Event) -> EventForwardedPayload {
        EventForwardedPayload {
            event_type: EventForwardedPayload::EVENT_TYPE.to_string(),
            delivery_id: Uuid::now_v7(),
            event_id: event.id().to_string(),
            received_at: event.received_at().unix_timestamp(),
            event: event.payload().clone(),
        }
    }
}

#[async_trait]
impl EventHandler for WebhookForwarder {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let payload = Self::payload(event);
        let delivery_id = payload.delivery_id;
        let signed = SignedObject::new(payload, &self.secret).map_err(HandlerError::from_error)?;

        let response = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signed.to_header())
            .body(signed.json)
            .send()
            .await
            .map_err(HandlerError::from_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(
                url = %self.url,
                event_id = %event.id(),
                delivery_id = %delivery_id,
                "Webhook delivered"
            );
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(HandlerError::msg(format!(
            "webhook {} answered {}: {}",
            self.url,
            status.as_u16(),
            body.trim()
        )))
    }
}
