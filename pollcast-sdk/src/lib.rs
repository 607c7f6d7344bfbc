//! Shared types for pollcast.
//!
//! - [`objects`]: JSON shapes exchanged with the polled API, with webhook
//!   receivers and with the status API.
//! - [`signature`]: HMAC-SHA256 body signing used for forwarded events.
//! - `client` (feature `client`): a typed client for the status API and a
//!   webhook verification helper.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod objects;
pub mod signature;

#[cfg(feature = "client")]
pub mod client;
