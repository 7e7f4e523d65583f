//! # Push-Frame Codec
//!
//! Inbound messages carry zero or more calls of the shape `tag(arg, ...)`,
//! where `tag` is `z` (snapshot) or `d` (delta). Arguments are
//! comma-separated, single-quoted arguments may contain commas, `$` decodes
//! to an empty string and `#` means the field is omitted entirely.
//!
//! Decoding is two separable steps: a quote-aware tokenizer producing an
//! ordered field list, then a typed decoder routing each call through the
//! table registry. A call that fails either step is dropped on its own;
//! the rest of the message still decodes.

use std::sync::Arc;

use crate::core::registry::{TableRegistry, TableRole};

/// Placeholder for values the wire did not carry.
const UNKNOWN: &str = "unknown";

/// Kind of a push call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `z(...)`: full initial state for a table.
    Snapshot,
    /// `d(...)`: incremental update.
    Delta,
}

/// Whether a quote event came from a snapshot or an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    /// Initial price image.
    Init,
    /// Incremental price change.
    Update,
}

/// A decoded price event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceUpdate {
    /// Update on one of the fixed underlying currency-pair feeds.
    ForexUnderlying {
        /// Currency pair, e.g. `EUR/USD`.
        pair: String,
        /// Last traded price as carried on the wire.
        price: String,
        /// `HH:MM:SS` wall-clock stamp, or `unknown`.
        timestamp: String,
    },
    /// Update on a dynamically-subscribed instrument table.
    InstrumentQuote {
        /// The instrument the table was subscribed for.
        instrument: String,
        /// Snapshot or incremental.
        kind: QuoteKind,
        /// Bid price, or `unknown`.
        bid: String,
        /// Ask price, or `unknown`.
        ask: String,
        /// `HH:MM:SS` wall-clock stamp, or `unknown`.
        timestamp: String,
    },
}

/// Decodes inbound push frames into [`PriceUpdate`] events using the live
/// table registry.
pub struct MessageCodec {
    registry: Arc<TableRegistry>,
}

impl MessageCodec {
    /// Creates a codec reading the given registry.
    pub fn new(registry: Arc<TableRegistry>) -> Self {
        Self { registry }
    }

    /// Decodes every call in one inbound message. Calls that are malformed
    /// or reference an unregistered table decode to nothing.
    pub fn decode_message(&self, message: &str) -> Vec<PriceUpdate> {
        extract_calls(message)
            .into_iter()
            .filter_map(|(kind, args)| self.decode_call(kind, args))
            .collect()
    }

    fn decode_call(&self, kind: CallKind, args: &str) -> Option<PriceUpdate> {
        let fields = parse_csv_args(args);
        let table: u32 = match fields.first()?.parse() {
            Ok(id) => id,
            Err(_) => {
                log::debug!("push call with non-integer table id dropped: {args}");
                return None;
            }
        };
        // Field 1 is the item ordinal (defaults to 1); single-item tables
        // never need it, so it is not carried into the event.

        let entry = self.registry.lookup(table)?;
        match entry.role {
            TableRole::ForexUnderlying => {
                // Snapshots on underlying feeds carry no tradeable price.
                if kind != CallKind::Delta {
                    return None;
                }
                let pair = entry.instrument?;
                let price = fields.get(2)?.clone();
                let timestamp = find_time_field(&fields, 3)
                    .unwrap_or(UNKNOWN)
                    .to_string();
                Some(PriceUpdate::ForexUnderlying {
                    pair,
                    price,
                    timestamp,
                })
            }
            TableRole::StrikeQuote | TableRole::StrikeDepth => {
                let instrument = entry.instrument?;
                let (quote_kind, time_start) = match kind {
                    CallKind::Snapshot => (QuoteKind::Init, 4),
                    CallKind::Delta => (QuoteKind::Update, 3),
                };
                let bid = fields.get(2).cloned().unwrap_or_else(|| UNKNOWN.into());
                let ask = fields.get(3).cloned().unwrap_or_else(|| UNKNOWN.into());
                let timestamp = find_time_field(&fields, time_start)
                    .unwrap_or(UNKNOWN)
                    .to_string();
                Some(PriceUpdate::InstrumentQuote {
                    instrument,
                    kind: quote_kind,
                    bid,
                    ask,
                    timestamp,
                })
            }
            // Bind, core and hierarchy tables carry no price payload.
            _ => None,
        }
    }
}

/// Extracts every `z(...)` / `d(...)` call from a message, respecting
/// single-quoted arguments (a `)` inside quotes does not end the call).
pub fn extract_calls(message: &str) -> Vec<(CallKind, &str)> {
    let bytes = message.as_bytes();
    let mut calls = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let tag = bytes[i];
        if (tag == b'z' || tag == b'd') && bytes.get(i + 1) == Some(&b'(') {
            let preceded_by_word = i > 0
                && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_');
            if !preceded_by_word {
                let mut j = i + 2;
                let mut in_quote = false;
                let mut close = None;
                while j < bytes.len() {
                    match bytes[j] {
                        b'\'' => in_quote = !in_quote,
                        b')' if !in_quote => {
                            close = Some(j);
                            break;
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if let Some(close) = close {
                    let kind = if tag == b'z' {
                        CallKind::Snapshot
                    } else {
                        CallKind::Delta
                    };
                    calls.push((kind, message[i + 2..close].trim()));
                    i = close + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    calls
}

/// Splits a call's argument list into cleaned fields.
///
/// Commas inside single quotes do not split; surrounding whitespace and
/// quotes are stripped; `$` becomes the empty string; `#` drops the field
/// from the list entirely.
pub fn parse_csv_args(raw: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    for (i, c) in raw.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                pieces.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&raw[start..]);

    pieces
        .into_iter()
        .filter_map(|piece| {
            let cleaned = piece.trim().trim_matches('\'');
            match cleaned {
                "#" => None,
                "$" => Some(String::new()),
                other => Some(other.to_string()),
            }
        })
        .collect()
}

/// Finds the first field at or after `start` shaped like `HH:MM:SS`.
fn find_time_field(fields: &[String], start: usize) -> Option<&str> {
    fields
        .iter()
        .skip(start)
        .find(|f| looks_like_time(f))
        .map(String::as_str)
}

fn looks_like_time(value: &str) -> bool {
    let b = value.as_bytes();
    b.len() >= 8
        && b[0].is_ascii_digit()
        && b[1].is_ascii_digit()
        && b[2] == b':'
        && b[3].is_ascii_digit()
        && b[4].is_ascii_digit()
        && b[5] == b':'
        && b[6].is_ascii_digit()
        && b[7].is_ascii_digit()
}
