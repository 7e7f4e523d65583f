//! Client implementations for the Nadex iDeal REST endpoints and the
//! Lightstreamer session-creation endpoint.

/// Authentication and streaming-session negotiation.
pub mod apicall;
/// Market hierarchy tree and instrument-catalog assembly.
pub mod hierarchy;
