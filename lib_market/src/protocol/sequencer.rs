//! # Subscription Sequencer
//!
//! Turns the instrument catalog and the fixed subscription templates into
//! an ordered, paced stream of control requests. Ordering matters: the
//! bind request on table 1 establishes the session binding everything
//! later depends on. Pacing matters too: the far end bounds control
//! traffic, so the delay after each send is a protocol requirement rather
//! than a tunable.

use std::sync::Arc;

use tokio::time::sleep;

use crate::core::registry::{TableRegistry, TableRole};
use crate::core::writer::UpstreamWriter;
use crate::error::RelayError;
use crate::markets::nadex::hierarchy::InstrumentCatalog;

use super::constants::{
    BIND_TABLE, BOOTSTRAP_PACING, DYNAMIC_PACING, FIRST_CORE_TABLE, FOREX_PAIRS,
    INITIAL_REQ_PHASE,
};
use super::request::{
    bind_session_line, core_subscriptions, forex_key, hierarchy_key, strike_depth_key,
    strike_quote_key, ControlRequest, LsMode, FOREX_SCHEMA, HIERARCHY_SCHEMA,
    STRIKE_DEPTH_SCHEMA, STRIKE_QUOTE_SCHEMA,
};
use super::Session;

/// Allocates ids and phases and emits subscription requests in protocol
/// order. One sequencer owns the request-phase counter for the whole
/// session; the table counter lives in the shared registry.
pub struct SubscriptionSequencer {
    session: Session,
    user_id: String,
    registry: Arc<TableRegistry>,
    req_phase: u32,
}

impl SubscriptionSequencer {
    /// Creates a sequencer for an established session.
    pub fn new(session: Session, user_id: impl Into<String>, registry: Arc<TableRegistry>) -> Self {
        Self {
            session,
            user_id: user_id.into(),
            registry,
            req_phase: INITIAL_REQ_PHASE,
        }
    }

    /// The registry this sequencer allocates from.
    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    fn next_phase(&mut self) -> u32 {
        let phase = self.req_phase;
        self.req_phase += 1;
        phase
    }

    fn control(&mut self, mode: LsMode, key: String, schema: &str, snapshot: bool, table: u32) -> String {
        ControlRequest {
            mode,
            key,
            schema: schema.to_string(),
            snapshot,
            table,
            req_phase: self.next_phase(),
            session: self.session.id.clone(),
        }
        .to_line()
    }

    /// Emits the bind request and the thirteen fixed subscriptions,
    /// strictly in table order 1 → 7 → 14.
    pub async fn send_bootstrap(&mut self, writer: &UpstreamWriter) -> Result<(), RelayError> {
        self.registry.register(BIND_TABLE, None, TableRole::Bind);
        let phase = self.next_phase();
        let bind = bind_session_line(&self.session, phase);
        writer.send_line(bind)?;
        sleep(BOOTSTRAP_PACING).await;

        for (offset, (mode, key, schema, snapshot)) in
            core_subscriptions(&self.user_id).into_iter().enumerate()
        {
            let table = FIRST_CORE_TABLE + offset as u32;
            self.registry.register(table, None, TableRole::Core);
            let line = self.control(mode, key, schema, snapshot, table);
            writer.send_line(line)?;
            sleep(BOOTSTRAP_PACING).await;
        }

        for (table, symbol, pair) in FOREX_PAIRS {
            self.registry
                .register(table, Some(pair), TableRole::ForexUnderlying);
            let line = self.control(LsMode::Merge, forex_key(symbol), FOREX_SCHEMA, true, table);
            writer.send_line(line)?;
            sleep(BOOTSTRAP_PACING).await;
        }

        log::info!("bootstrap subscriptions sent (tables 1-14)");
        Ok(())
    }

    /// Subscribes every instrument in catalog order: a quote table then a
    /// depth table per instrument, two fresh ids each. Returns how many
    /// instruments were subscribed.
    pub async fn send_dynamic_subscriptions(
        &mut self,
        writer: &UpstreamWriter,
        catalog: &InstrumentCatalog,
    ) -> Result<usize, RelayError> {
        let mut count = 0;
        for epic in catalog.epics() {
            let quote_table = self.registry.allocate(TableRole::StrikeQuote, Some(epic));
            let line = self.control(
                LsMode::Merge,
                strike_quote_key(epic),
                STRIKE_QUOTE_SCHEMA,
                true,
                quote_table,
            );
            writer.send_line(line)?;
            sleep(DYNAMIC_PACING).await;

            let depth_table = self.registry.allocate(TableRole::StrikeDepth, Some(epic));
            let line = self.control(
                LsMode::Merge,
                strike_depth_key(epic),
                STRIKE_DEPTH_SCHEMA,
                true,
                depth_table,
            );
            writer.send_line(line)?;
            sleep(DYNAMIC_PACING).await;

            count += 1;
        }
        log::info!("subscribed {count} instruments ({} dynamic tables)", count * 2);
        Ok(count)
    }

    /// Subscribes the hierarchy push feed of each top-level market.
    pub async fn send_hierarchy_subscriptions(
        &mut self,
        writer: &UpstreamWriter,
        market_ids: &[u64],
    ) -> Result<(), RelayError> {
        for &market_id in market_ids {
            let table = self.registry.allocate(TableRole::Hierarchy, None);
            let line = self.control(
                LsMode::Raw,
                hierarchy_key(market_id),
                HIERARCHY_SCHEMA,
                false,
                table,
            );
            writer.send_line(line)?;
            sleep(BOOTSTRAP_PACING).await;
        }
        log::info!("hierarchy subscriptions sent for {} market(s)", market_ids.len());
        Ok(())
    }

    /// One resubscription pass: drops every dynamic table and re-subscribes
    /// the given catalog. The clear is atomic from the decoder's point of
    /// view; frames for retired ids simply stop matching.
    pub async fn resubscribe(
        &mut self,
        writer: &UpstreamWriter,
        catalog: &InstrumentCatalog,
    ) -> Result<usize, RelayError> {
        self.registry.reset();
        self.send_dynamic_subscriptions(writer, catalog).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::writer::upstream_channel;
    use crate::markets::nadex::hierarchy::{MarketEntry, UnderlyingEntry};

    fn session() -> Session {
        Session {
            id: "Sabc".to_string(),
            host: "push.example.com".to_string(),
            phase: 2303,
        }
    }

    fn catalog(epics_per_underlying: &[(&str, &[&str])]) -> InstrumentCatalog {
        InstrumentCatalog {
            markets: vec![MarketEntry {
                market_id: 101,
                underlyings: epics_per_underlying
                    .iter()
                    .map(|(underlying, epics)| UnderlyingEntry {
                        underlying: underlying.to_string(),
                        epics: epics.iter().map(|e| e.to_string()).collect(),
                    })
                    .collect(),
            }],
        }
    }

    fn field(line: &str, key: &str) -> Option<String> {
        line.split('&').find_map(|pair| {
            pair.strip_prefix(&format!("{key}="))
                .map(|v| v.to_string())
        })
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_emits_tables_one_through_fourteen_in_order() {
        let registry = Arc::new(TableRegistry::new());
        let mut sequencer = SubscriptionSequencer::new(session(), "TRADER01", registry.clone());
        let (writer, mut rx) = upstream_channel();

        sequencer.send_bootstrap(&writer).await.unwrap();
        let lines = drain(&mut rx);

        assert_eq!(lines.len(), 14);
        assert!(lines[0].starts_with("bind_session\r\n"));
        let tables: Vec<String> = lines.iter().filter_map(|l| field(l, "LS_table")).collect();
        let expected: Vec<String> = (1..=14).map(|t| t.to_string()).collect();
        assert_eq!(tables, expected);
        assert_eq!(registry.len(), 14);
    }

    #[tokio::test(start_paused = true)]
    async fn phases_are_contiguous_across_bootstrap_and_subscribe() {
        let registry = Arc::new(TableRegistry::new());
        let mut sequencer = SubscriptionSequencer::new(session(), "TRADER01", registry.clone());
        let (writer, mut rx) = upstream_channel();

        sequencer.send_bootstrap(&writer).await.unwrap();
        let catalog = catalog(&[("U1", &["E1", "E2"]), ("U2", &["E3"])]);
        sequencer
            .send_dynamic_subscriptions(&writer, &catalog)
            .await
            .unwrap();
        sequencer
            .send_hierarchy_subscriptions(&writer, &[101])
            .await
            .unwrap();

        let lines = drain(&mut rx);
        let phases: Vec<u32> = lines
            .iter()
            .filter_map(|l| field(l, "LS_req_phase"))
            .map(|p| p.parse().unwrap())
            .collect();
        // 14 bootstrap + 6 dynamic + 1 hierarchy requests.
        assert_eq!(phases.len(), 21);
        assert_eq!(phases[0], INITIAL_REQ_PHASE);
        for pair in phases.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_tables_are_a_contiguous_block_from_fifteen() {
        let registry = Arc::new(TableRegistry::new());
        let mut sequencer = SubscriptionSequencer::new(session(), "TRADER01", registry.clone());
        let (writer, mut rx) = upstream_channel();

        let catalog = catalog(&[("U1", &["E1", "E2", "E3"])]);
        let count = sequencer
            .send_dynamic_subscriptions(&writer, &catalog)
            .await
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(registry.dynamic_len(), 6);

        let lines = drain(&mut rx);
        let tables: Vec<u32> = lines
            .iter()
            .filter_map(|l| field(l, "LS_table"))
            .map(|t| t.parse().unwrap())
            .collect();
        assert_eq!(tables, vec![15, 16, 17, 18, 19, 20]);

        // Quote table precedes depth table per instrument.
        let entry = registry.lookup(15).unwrap();
        assert_eq!(entry.role, TableRole::StrikeQuote);
        let entry = registry.lookup(16).unwrap();
        assert_eq!(entry.role, TableRole::StrikeDepth);
        assert_eq!(entry.instrument.as_deref(), Some("E1"));
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_swaps_the_dynamic_portion_without_reusing_ids() {
        let registry = Arc::new(TableRegistry::new());
        let mut sequencer = SubscriptionSequencer::new(session(), "TRADER01", registry.clone());
        let (writer, mut rx) = upstream_channel();

        sequencer
            .send_dynamic_subscriptions(&writer, &catalog(&[("U1", &["E1", "E2"])]))
            .await
            .unwrap();
        drain(&mut rx);

        sequencer
            .resubscribe(&writer, &catalog(&[("U1", &["E9"])]))
            .await
            .unwrap();

        assert_eq!(registry.dynamic_len(), 2);
        assert!(registry.lookup(15).is_none(), "stale id stays retired");
        let entry = registry.lookup(19).unwrap();
        assert_eq!(entry.instrument.as_deref(), Some("E9"));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_delays_are_applied_between_sends() {
        let registry = Arc::new(TableRegistry::new());
        let mut sequencer = SubscriptionSequencer::new(session(), "TRADER01", registry);
        let (writer, _rx) = upstream_channel();

        let start = tokio::time::Instant::now();
        sequencer.send_bootstrap(&writer).await.unwrap();
        // 14 sends, each followed by the bootstrap pacing delay.
        assert_eq!(start.elapsed(), BOOTSTRAP_PACING * 14);
    }
}
