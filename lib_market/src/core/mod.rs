//! # Core Engine Module
//!
//! Session-long shared state and plumbing: the table registry the decoder
//! reads on every inbound frame, the fan-out hub for downstream consumers,
//! and the single-writer handle for the upstream connection.

/// Fan-out of raw frames to downstream consumers.
pub mod dispatcher;
/// Table-id ⇄ instrument/role bookkeeping.
pub mod registry;
/// Serialized writer handle for the upstream connection.
pub mod writer;
