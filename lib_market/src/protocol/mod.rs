//! # Upstream Protocol Module
//!
//! Everything that knows the Lightstreamer wire protocol: the fixed
//! constants the server-side session semantics depend on, the
//! control-request builder, the push-frame codec and the subscription
//! sequencer that paces control traffic over the open connection.

/// Push-frame tokenizer and typed decoder.
pub mod codec;
/// Named protocol constants (table ranges, phases, pacing).
pub mod constants;
/// Control-request templates and wire encoding.
pub mod request;
/// Ordered, paced emission of subscription requests.
pub mod sequencer;

/// A negotiated streaming session.
///
/// Immutable once established; `phase` already includes the fixed
/// start-of-session offset and is reused verbatim on every control
/// request for the lifetime of the connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Server-assigned session identifier.
    pub id: String,
    /// Host to open the streaming connection against.
    pub host: String,
    /// Session phase carried by bind and keepalive requests.
    pub phase: u32,
}
