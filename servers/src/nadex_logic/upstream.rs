//! # Stream Orchestrator
//!
//! Owns the upstream connection for its whole life:
//! `Connecting → Bootstrapping → Subscribing → Streaming ⇄ Resubscribing
//! → Draining → Closed`. The read loop, the keepalive monitor and the
//! resubscription timer interleave freely during `Streaming`. Teardown is
//! ordered: background tasks first, then the upstream socket, then the
//! downstream consumers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use lib_market::{
    InstrumentCatalog, MessageCodec, NadexApiClient, PriceUpdate, RelayHub, Session,
    SubscriptionSequencer, TableRegistry,
};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;

use super::monitor::{self, LivenessState};

/// Subprotocol the push endpoint requires on the WebSocket handshake.
const LS_SUBPROTOCOL: &str = "js.lightstreamer.com";

/// Lifecycle of the upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Connecting,
    Bootstrapping,
    Subscribing,
    Streaming,
    Resubscribing,
    Draining,
    Closed,
}

/// Shared, logged phase tracker. `Resubscribing` is re-entrant from
/// `Streaming`; every other transition is one-way.
pub struct PhaseCell(Mutex<StreamPhase>);

impl PhaseCell {
    pub fn new() -> Self {
        Self(Mutex::new(StreamPhase::Connecting))
    }

    pub fn set(&self, next: StreamPhase) {
        let mut phase = self.0.lock().expect("phase lock poisoned");
        if *phase != next {
            log::info!("stream phase: {:?} -> {:?}", *phase, next);
            *phase = next;
        }
    }

    pub fn get(&self) -> StreamPhase {
        *self.0.lock().expect("phase lock poisoned")
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the read loop ended.
enum CloseReason {
    Shutdown,
    RemoteClosed(String),
    ReadError(String),
}

pub struct StreamOrchestrator {
    pub session: Session,
    pub catalog: InstrumentCatalog,
    pub api: Arc<NadexApiClient>,
    pub registry: Arc<TableRegistry>,
    pub hub: Arc<RelayHub>,
    pub ping_interval: Duration,
    pub cancel: CancellationToken,
}

impl StreamOrchestrator {
    /// Runs the session to completion. Returns `Ok` on an orderly
    /// shutdown; an upstream failure or remote close surfaces as an error.
    pub async fn run(self) -> Result<()> {
        let phase = Arc::new(PhaseCell::new());

        // --- Connecting ---
        let url = format!("wss://{}/lightstreamer", self.session.host);
        log::info!("connecting upstream: {url}");
        let mut request = url
            .into_client_request()
            .context("invalid upstream url")?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(LS_SUBPROTOCOL),
        );
        // Connection failure here is fatal; there is no retry policy.
        let (ws_stream, _) = connect_async(request)
            .await
            .context("upstream connect failed")?;
        log::info!("upstream connected");
        let (mut write, mut read) = ws_stream.split();

        // Single-writer discipline: every logical sender queues lines
        // through this task.
        let (writer, mut line_rx) = lib_market::upstream_channel();
        let writer_handle = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(line.into())).await {
                    log::error!("upstream write failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        // --- Bootstrapping ---
        phase.set(StreamPhase::Bootstrapping);
        let mut sequencer = SubscriptionSequencer::new(
            self.session.clone(),
            self.api.user_id(),
            self.registry.clone(),
        );
        sequencer.send_bootstrap(&writer).await?;

        // --- Subscribing ---
        phase.set(StreamPhase::Subscribing);
        sequencer
            .send_dynamic_subscriptions(&writer, &self.catalog)
            .await?;
        sequencer
            .send_hierarchy_subscriptions(&writer, &self.catalog.market_ids())
            .await?;

        // --- Streaming ---
        phase.set(StreamPhase::Streaming);
        let liveness = Arc::new(LivenessState::new());
        let keepalive_handle = tokio::spawn(monitor::run_keepalive(
            self.session.clone(),
            writer.clone(),
            self.ping_interval,
            liveness.clone(),
            self.cancel.clone(),
        ));
        // The sequencer moves into the resubscription task; it stays the
        // single owner of the phase and table counters.
        let resub_handle = tokio::spawn(monitor::run_resubscription(
            self.api.clone(),
            sequencer,
            writer.clone(),
            phase.clone(),
            self.cancel.clone(),
        ));

        let codec = MessageCodec::new(self.registry.clone());
        let reason = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break CloseReason::Shutdown;
                }
                msg = read.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        liveness.scan(&text);
                        self.hub.broadcast(Arc::from(text.as_str()));
                        for update in codec.decode_message(&text) {
                            log_update(&update);
                        }
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        let detail = frame
                            .map(|f| format!("{} {}", f.code, f.reason))
                            .unwrap_or_else(|| "no close frame".to_string());
                        break CloseReason::RemoteClosed(detail);
                    }
                    Some(Err(e)) => break CloseReason::ReadError(e.to_string()),
                    None => break CloseReason::RemoteClosed("stream ended".to_string()),
                    _ => {}
                }
            }
        };

        // --- Draining ---
        phase.set(StreamPhase::Draining);
        self.cancel.cancel();
        let _ = keepalive_handle.await;
        let _ = resub_handle.await;
        // Last writer handle gone: the sink task closes the socket.
        drop(writer);
        let _ = writer_handle.await;
        self.hub.close_all();
        phase.set(StreamPhase::Closed);

        match reason {
            CloseReason::Shutdown => {
                log::info!("upstream session closed after shutdown signal");
                Ok(())
            }
            CloseReason::RemoteClosed(detail) => {
                Err(anyhow!("upstream closed the connection: {detail}"))
            }
            CloseReason::ReadError(detail) => Err(anyhow!("upstream read failed: {detail}")),
        }
    }
}

fn log_update(update: &PriceUpdate) {
    match update {
        PriceUpdate::ForexUnderlying {
            pair,
            price,
            timestamp,
        } => {
            log::debug!("[FOREX] {pair} -> {price} @ {timestamp}");
        }
        PriceUpdate::InstrumentQuote {
            instrument,
            kind,
            bid,
            ask,
            timestamp,
        } => {
            log::debug!("[{kind:?}] {instrument} bid={bid} ask={ask} @ {timestamp}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_cell_tracks_transitions() {
        let phase = PhaseCell::new();
        assert_eq!(phase.get(), StreamPhase::Connecting);
        phase.set(StreamPhase::Bootstrapping);
        phase.set(StreamPhase::Bootstrapping); // no-op, not a re-entry
        assert_eq!(phase.get(), StreamPhase::Bootstrapping);
        phase.set(StreamPhase::Streaming);
        phase.set(StreamPhase::Resubscribing);
        phase.set(StreamPhase::Streaming);
        assert_eq!(phase.get(), StreamPhase::Streaming);
    }

    #[test]
    fn cancellation_is_idempotent() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());
    }
}
