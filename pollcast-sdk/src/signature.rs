//! HMAC-SHA256 signing for forwarded events.
//!
//! Every webhook POSTed by pollcast carries:
//!
//! ```text
//! Pollcast-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! where the signature is `HMAC-SHA256("{timestamp}.{json_body}", secret)`.

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "Pollcast-Signature";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Marker trait for types that can participate in body signing via
/// [`SignedObject`].
pub trait Signature: for<'de> serde::Deserialize<'de> + serde::Serialize {}

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

/// A signed body carrying its typed payload, timestamp, raw JSON, and
/// HMAC-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedObject<T: Signature> {
    pub body: T,
    pub timestamp: i64,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signature> SignedObject<T> {
    /// Serialize `body` and sign it with the current timestamp.
    pub fn new(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Self::new_at(body, key, now)
    }

    /// Same as [`new`](Self::new) with an explicit timestamp.
    pub fn new_at(body: T, key: &[u8], timestamp: i64) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&body)?;
        let signature = sign_body(timestamp, &json, key);
        Ok(Self {
            body,
            timestamp,
            json,
            signature,
        })
    }

    /// Reconstruct from a raw `Pollcast-Signature` header value and the JSON
    /// body. Does **not** verify; call [`verify`](Self::verify) for that.
    pub fn from_header_and_body(
        header_value: &str,
        body_json: String,
    ) -> Result<Self, SignatureError> {
        let (timestamp, signature) = parse_signature_header(header_value)?;
        let body: T = serde_json::from_str(&body_json)?;
        Ok(Self {
            body,
            timestamp,
            json: body_json,
            signature,
        })
    }

    /// Verify the HMAC and timestamp freshness, returning the payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        let data = format!("{}.{}", self.timestamp, self.json);
        ring::hmac::verify(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
            self.signature.as_ref(),
        )?;
        check_timestamp(self.timestamp)?;
        Ok(self.body)
    }

    /// Format the full `Pollcast-Signature` header value.
    pub fn to_header(&self) -> String {
        format_signature_header(self.timestamp, &self.signature)
    }
}

fn sign_body(timestamp: i64, json: &str, key: &[u8]) -> Box<[u8]> {
    let data = format!("{timestamp}.{json}");
    let signature = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
    );
    signature.as_ref().to_owned().into_boxed_slice()
}

/// Parse a `{timestamp}.{base64}` header value.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = fast32::base64::RFC4648_NOPAD
        .decode_str(encoded)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

/// Format a `{timestamp}.{base64}` header value from its parts.
pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now - timestamp > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}
