//! # Control-Request Builder
//!
//! Every subscription action is one text line built from a fixed template
//! of `&`-joined `key=value` pairs. The builder separates field semantics
//! from wire encoding: callers hand it plain subscription keys and schema
//! lists, and it percent-encodes them on the way out.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use super::constants::WINDOW_PHASE;
use super::Session;

/// Subscription delivery mode requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsMode {
    /// Raw event stream, no conflation.
    Raw,
    /// Merged field image, updates conflated per item.
    Merge,
}

impl LsMode {
    fn as_str(self) -> &'static str {
        match self {
            LsMode::Raw => "RAW",
            LsMode::Merge => "MERGE",
        }
    }
}

/// One `control` line adding a subscription table.
#[derive(Debug, Clone)]
pub struct ControlRequest {
    /// Delivery mode.
    pub mode: LsMode,
    /// Subscription key, unencoded (`LS_id`).
    pub key: String,
    /// Space-separated schema field list, unencoded (`LS_schema`).
    pub schema: String,
    /// Whether the server should send an initial snapshot.
    pub snapshot: bool,
    /// Requested table id.
    pub table: u32,
    /// Per-request phase.
    pub req_phase: u32,
    /// Session the table is added to.
    pub session: String,
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

impl ControlRequest {
    /// Renders the request into its wire line.
    pub fn to_line(&self) -> String {
        let mut line = String::from("control\r\n");
        line.push_str(&format!("LS_mode={}&", self.mode.as_str()));
        line.push_str(&format!("LS_id={}&", encode(&self.key)));
        line.push_str(&format!("LS_schema={}&", encode(&self.schema)));
        if self.snapshot {
            line.push_str("LS_snapshot=true&");
        }
        line.push_str("LS_requested_max_frequency=1&");
        line.push_str(&format!("LS_table={}&", self.table));
        line.push_str(&format!("LS_req_phase={}&", self.req_phase));
        line.push_str(&format!("LS_win_phase={}&", WINDOW_PHASE));
        line.push_str("LS_op=add&");
        line.push_str(&format!("LS_session={}&", self.session));
        line
    }
}

/// Builds the session-bind message: a `bind_session` line followed by the
/// heartbeat subscription on table 1. It must be the first message on the
/// connection, since later control requests depend on the binding.
pub fn bind_session_line(session: &Session, req_phase: u32) -> String {
    let heartbeat = ControlRequest {
        mode: LsMode::Raw,
        key: "M___.HB|HB.U.HEARTBEAT.IP".to_string(),
        schema: "HEARTBEAT".to_string(),
        snapshot: false,
        table: super::constants::BIND_TABLE,
        req_phase,
        session: session.id.clone(),
    };
    format!(
        "bind_session\r\nLS_session={}&LS_phase={}&LS_cause=loop1&LS_container=lsc&{}",
        session.id,
        session.phase,
        heartbeat.to_line()
    )
}

/// Builds the keepalive line. Uses `LS_op=constrain` and carries no table.
pub fn keepalive_line(session: &Session) -> String {
    format!(
        "control\r\nLS_op=constrain&LS_session={}&LS_phase={}&LS_cause=keepalive&\
         LS_polling=true&LS_polling_millis=0&LS_idle_millis=0&LS_container=lsc&",
        session.id, session.phase
    )
}

/// The six fixed core subscriptions for tables 2-7, in table order:
/// `(mode, key, schema, snapshot)`.
pub fn core_subscriptions(user_id: &str) -> Vec<(LsMode, String, &'static str, bool)> {
    vec![
        (
            LsMode::Raw,
            format!("V2-M-MESSAGE_EVENT_HANDLER|{user_id}"),
            "message",
            false,
        ),
        (
            LsMode::Merge,
            format!("V2-AD-AC_AVAILABLE_BALANCE,AC_USED_MARGIN|ACC.{user_id}"),
            "AC_AVAILABLE_BALANCE AC_USED_MARGIN",
            true,
        ),
        (
            LsMode::Raw,
            format!("V2-M-MESSAGE_EVENT_HANDLER|{user_id}-OP-JSON"),
            "json",
            false,
        ),
        (
            LsMode::Raw,
            format!("M___.MGE|{user_id}-LGT"),
            "message",
            false,
        ),
        (
            LsMode::Raw,
            format!("V2-M-MESSAGE_EVENT_HANDLER|{user_id}-WO-JSON"),
            "json",
            false,
        ),
        (
            LsMode::Raw,
            format!("V2-M-MESSAGE_EVENT_HANDLER|{user_id}-OH-JSON"),
            "json",
            false,
        ),
    ]
}

/// Subscription key for a fixed forex-underlying feed.
pub fn forex_key(symbol: &str) -> String {
    format!("V2-F-LTP,UTM|CH.U.X:{symbol}:1321:BLD.OPT-1-1.IP")
}

/// Schema of the fixed forex-underlying feeds.
pub const FOREX_SCHEMA: &str = "lastTradedPrice updateTime";

/// Subscription key for an instrument's top-of-book quote table.
pub fn strike_quote_key(epic: &str) -> String {
    format!("V2-F-BD1,AK1,BS1,AS1,UTM,DLY,UBS,SWAP_3_SHORT,SWAP_3_LONG|{epic}")
}

/// Schema of the top-of-book quote tables.
pub const STRIKE_QUOTE_SCHEMA: &str = "displayOffer displayBid bidSize offerSize updateTime \
                                       delayTime marketStatus swapPointSell swapPointBuy";

/// Subscription key for an instrument's five-level depth table.
pub fn strike_depth_key(epic: &str) -> String {
    format!(
        "V2-F-BD1,AK1,BS1,AS1,BD2,AK2,BS2,AS2,BD3,AK3,BS3,AS3,\
         BD4,AK4,BS4,AS4,BD5,AK5,BS5,AS5|{epic}"
    )
}

/// Schema of the five-level depth tables.
pub const STRIKE_DEPTH_SCHEMA: &str = "displayOffer displayBid bidSize offerSize \
     displayOffer2 displayBid2 bidSize2 offerSize2 \
     displayOffer3 displayBid3 bidSize3 offerSize3 \
     displayOffer4 displayBid4 bidSize4 offerSize4 \
     displayOffer5 displayBid5 bidSize5 offerSize5";

/// Subscription key for a market's hierarchy push feed.
pub fn hierarchy_key(market_id: u64) -> String {
    format!("M___.MGE|HIER-{market_id}-JSON")
}

/// Schema of the hierarchy push feeds.
pub const HIERARCHY_SCHEMA: &str = "json";

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            id: "S7c123".to_string(),
            host: "push.example.com".to_string(),
            phase: 2303,
        }
    }

    #[test]
    fn control_line_has_the_template_field_order() {
        let request = ControlRequest {
            mode: LsMode::Merge,
            key: "V2-F-LTP,UTM|CH.U.X:SEURUSD:1321:BLD.OPT-1-1.IP".to_string(),
            schema: FOREX_SCHEMA.to_string(),
            snapshot: true,
            table: 9,
            req_phase: 627,
            session: "S7c123".to_string(),
        };
        let line = request.to_line();
        assert!(line.starts_with("control\r\nLS_mode=MERGE&LS_id="));
        assert!(line.contains("LS_id=V2%2DF%2DLTP%2CUTM%7CCH%2EU%2EX%3ASEURUSD%3A1321%3ABLD%2EOPT%2D1%2D1%2EIP&"));
        assert!(line.contains("LS_schema=lastTradedPrice%20updateTime&"));
        assert!(line.contains("LS_snapshot=true&LS_requested_max_frequency=1&"));
        assert!(line.contains("LS_table=9&LS_req_phase=627&LS_win_phase=50&"));
        assert!(line.ends_with("LS_op=add&LS_session=S7c123&"));
    }

    #[test]
    fn snapshot_flag_is_omitted_when_not_requested() {
        let request = ControlRequest {
            mode: LsMode::Raw,
            key: "M___.MGE|HIER-77-JSON".to_string(),
            schema: "json".to_string(),
            snapshot: false,
            table: 40,
            req_phase: 700,
            session: "S7c123".to_string(),
        };
        assert!(!request.to_line().contains("LS_snapshot"));
    }

    #[test]
    fn bind_message_prepends_the_session_binding() {
        let line = bind_session_line(&session(), 619);
        assert!(line.starts_with(
            "bind_session\r\nLS_session=S7c123&LS_phase=2303&LS_cause=loop1&LS_container=lsc&control\r\n"
        ));
        assert!(line.contains("LS_table=1&LS_req_phase=619&"));
        assert!(line.contains("LS_schema=HEARTBEAT&"));
    }

    #[test]
    fn keepalive_constrains_without_a_table() {
        let line = keepalive_line(&session());
        assert!(line.starts_with("control\r\nLS_op=constrain&LS_session=S7c123&LS_phase=2303&"));
        assert!(line.contains("LS_cause=keepalive&"));
        assert!(!line.contains("LS_table"));
    }

    #[test]
    fn core_subscriptions_are_six_in_table_order() {
        let subs = core_subscriptions("TRADER01");
        assert_eq!(subs.len(), 6);
        assert_eq!(subs[0].1, "V2-M-MESSAGE_EVENT_HANDLER|TRADER01");
        assert_eq!(subs[1].2, "AC_AVAILABLE_BALANCE AC_USED_MARGIN");
        assert!(subs[1].3, "only the balance feed wants a snapshot");
        assert_eq!(subs[5].1, "V2-M-MESSAGE_EVENT_HANDLER|TRADER01-OH-JSON");
    }
}
