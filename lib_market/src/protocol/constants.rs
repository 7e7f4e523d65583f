//! Fixed protocol constants.
//!
//! These values are part of the server-side session semantics: the far end
//! interprets table ids, phases and request pacing against them, so they
//! live in one table instead of being scattered through the builders.

use std::time::Duration;

/// Table id reserved for the session-bind request.
pub const BIND_TABLE: u32 = 1;
/// First of the six fixed core subscriptions.
pub const FIRST_CORE_TABLE: u32 = 2;
/// Last of the six fixed core subscriptions.
pub const LAST_CORE_TABLE: u32 = 7;
/// Highest table id with a fixed, session-long meaning; everything above
/// is allocated dynamically and never reused within a session.
pub const LAST_FIXED_TABLE: u32 = 14;
/// First dynamically-allocated table id.
pub const FIRST_DYNAMIC_TABLE: u32 = 15;

/// Offset added to the negotiated phase before the session is used.
pub const SESSION_PHASE_OFFSET: u32 = 2;
/// Starting value of the request-phase counter. The counter advances by
/// exactly one per control request, with no gaps, for the whole session.
pub const INITIAL_REQ_PHASE: u32 = 619;
/// Window phase carried by every control request of the session.
pub const WINDOW_PHASE: u32 = 50;

/// Pacing delay after each bootstrap or hierarchy control request. The far
/// end bounds control traffic; sending faster drops requests.
pub const BOOTSTRAP_PACING: Duration = Duration::from_millis(100);
/// Pacing delay after each dynamic (per-instrument) control request.
pub const DYNAMIC_PACING: Duration = Duration::from_millis(50);

/// The seven fixed forex-underlying feeds: `(table id, subscription
/// symbol, currency pair)`. Table order is part of the protocol.
pub const FOREX_PAIRS: [(u32, &str, &str); 7] = [
    (8, "SAUDUSD", "AUD/USD"),
    (9, "SEURUSD", "EUR/USD"),
    (10, "SGBPUSD", "GBP/USD"),
    (11, "SUSDJPY", "USD/JPY"),
    (12, "SEURJPY", "EUR/JPY"),
    (13, "SGBPJPY", "GBP/JPY"),
    (14, "SUSDCAD", "USD/CAD"),
];

/// Currency pair associated with a fixed forex-underlying table id.
pub fn forex_pair(table: u32) -> Option<&'static str> {
    FOREX_PAIRS
        .iter()
        .find(|(id, _, _)| *id == table)
        .map(|(_, _, pair)| *pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forex_tables_cover_the_fixed_range() {
        let ids: Vec<u32> = FOREX_PAIRS.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![8, 9, 10, 11, 12, 13, 14]);
        assert_eq!(forex_pair(8), Some("AUD/USD"));
        assert_eq!(forex_pair(14), Some("USD/CAD"));
        assert_eq!(forex_pair(15), None);
    }
}
