//! Webhook signature verification helper.

use crate::signature::{Signature, SignatureError, SignedObject};

/// Verify and deserialize an incoming pollcast webhook.
///
/// * `signature_header` – value of the `Pollcast-Signature` request header.
/// * `body` – raw JSON request body string.
/// * `secret` – the HMAC secret configured on the `webhook` handler.
///
/// ```ignore
/// use pollcast_sdk::client::verify_webhook;
/// use pollcast_sdk::objects::EventForwardedPayload;
///
/// let payload: EventForwardedPayload =
///     verify_webhook(signature_header, &body, secret)?;
/// ```
pub fn verify_webhook<T: Signature>(
    signature_header: &str,
    body: &str,
    secret: &[u8],
) -> Result<T, SignatureError> {
    SignedObject::<T>::from_header_and_body(signature_header, body.to_owned())?
        .verify(secret)
}
