//! # lib_market
//!
//! The subscription-protocol engine behind the Nadex Lightstreamer relay.
//! Everything that understands the upstream wire protocol lives here:
//!
//! - **`core`**: session-long bookkeeping (table registry), the downstream
//!   fan-out hub, and the serialized upstream writer handle.
//! - **`protocol`**: the fixed protocol constants, the control-request
//!   builder, the push-frame codec, and the subscription sequencer.
//! - **`markets`**: HTTP collaborators for authentication, session
//!   negotiation and the instrument-catalog hierarchy.
//!
//! The server binary in `servers/` composes these parts into the running
//! relay; this crate stays free of process concerns (signals, config files,
//! log sinks) so each piece is testable in isolation.

pub mod core;
pub mod error;
pub mod markets;
pub mod protocol;

pub use crate::core::dispatcher::RelayHub;
pub use crate::core::registry::{TableRegistry, TableRole};
pub use crate::core::writer::{upstream_channel, UpstreamWriter};
pub use crate::error::RelayError;
pub use crate::markets::nadex::apicall::{ApiConfig, NadexApiClient};
pub use crate::markets::nadex::hierarchy::InstrumentCatalog;
pub use crate::protocol::codec::{MessageCodec, PriceUpdate};
pub use crate::protocol::sequencer::SubscriptionSequencer;
pub use crate::protocol::Session;
