//! # Market APIs Module
//!
//! HTTP collaborators for the market-data provider: authentication,
//! streaming-session negotiation and the instrument-catalog hierarchy.
//! The protocol engine calls these at bootstrap and on every
//! resubscription cycle without caring how they are implemented.

/// Nadex iDeal / Lightstreamer HTTP endpoints.
pub mod nadex;
