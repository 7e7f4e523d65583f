//! Background activities running beside the read loop: the keepalive
//! monitor and the periodic resubscription timer. Both observe the shared
//! cancellation token within one tick and end before draining completes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use lib_market::protocol::request::keepalive_line;
use lib_market::{
    InstrumentCatalog, NadexApiClient, RelayError, Session, SubscriptionSequencer, UpstreamWriter,
};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use super::upstream::{PhaseCell, StreamPhase};

/// Token scanned for in inbound messages as the liveness acknowledgement.
const LIVENESS_TOKEN: &str = "PONG";
/// How often the keepalive loop re-checks elapsed time and cancellation.
const KEEPALIVE_TICK: Duration = Duration::from_secs(1);
/// Resubscription fires on this wall-clock boundary.
const RESUBSCRIBE_PERIOD_SECS: u32 = 300;

/// Liveness observations inferred from inbound traffic. Observability
/// only: a missing acknowledgement never terminates the connection.
pub struct LivenessState {
    last_ack: Mutex<Option<Instant>>,
}

impl LivenessState {
    pub fn new() -> Self {
        Self {
            last_ack: Mutex::new(None),
        }
    }

    /// Scans one inbound message for the liveness token.
    pub fn scan(&self, message: &str) {
        if message.to_ascii_uppercase().contains(LIVENESS_TOKEN) {
            *self.last_ack.lock().expect("liveness lock poisoned") = Some(Instant::now());
            log::debug!("liveness acknowledgement observed");
        }
    }

    pub fn last_ack(&self) -> Option<Instant> {
        *self.last_ack.lock().expect("liveness lock poisoned")
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends the keepalive request whenever `interval` has elapsed since the
/// last send, re-checking every tick so cancellation is observed promptly.
pub async fn run_keepalive(
    session: Session,
    writer: UpstreamWriter,
    interval: Duration,
    liveness: Arc<LivenessState>,
    cancel: CancellationToken,
) {
    let mut last_send = Instant::now();
    loop {
        if last_send.elapsed() >= interval {
            if writer.send_line(keepalive_line(&session)).is_err() {
                log::warn!("keepalive: upstream writer closed, stopping");
                break;
            }
            log::debug!("keepalive sent");
            last_send = Instant::now();

            match liveness.last_ack() {
                Some(ack) if ack.elapsed() > interval * 2 => {
                    log::warn!(
                        "no liveness acknowledgement for {}s",
                        ack.elapsed().as_secs()
                    );
                }
                _ => {}
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("keepalive monitor stopping");
                break;
            }
            _ = sleep(KEEPALIVE_TICK) => {}
        }
    }
}

/// Time until the next wall-clock boundary of the resubscription period.
fn next_boundary_wait(now: DateTime<Local>) -> Duration {
    let into_cycle = (now.minute() % (RESUBSCRIBE_PERIOD_SECS / 60)) * 60 + now.second();
    Duration::from_secs(u64::from(RESUBSCRIBE_PERIOD_SECS - into_cycle))
}

/// Refreshes the catalog on every period boundary and swaps the dynamic
/// subscriptions. A failed catalog fetch skips the cycle and keeps the
/// prior subscriptions in force.
pub async fn run_resubscription(
    api: Arc<NadexApiClient>,
    mut sequencer: SubscriptionSequencer,
    writer: UpstreamWriter,
    phase: Arc<PhaseCell>,
    cancel: CancellationToken,
) {
    loop {
        let wait = next_boundary_wait(Local::now());
        log::info!("next resubscription pass in {}s", wait.as_secs());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(wait) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        phase.set(StreamPhase::Resubscribing);
        match api.fetch_catalog().await {
            Err(e) => {
                log::warn!("catalog refresh failed, keeping prior subscriptions: {e}");
            }
            Ok(catalog) => match resubscribe_pass(&mut sequencer, &writer, &catalog).await {
                Ok(count) => log::info!("resubscribed {count} instrument(s)"),
                Err(RelayError::WriterClosed) => {
                    log::warn!("resubscription stopped: upstream writer closed");
                    phase.set(StreamPhase::Streaming);
                    break;
                }
                Err(e) => log::warn!("resubscription pass failed: {e}"),
            },
        }
        phase.set(StreamPhase::Streaming);
    }
    log::info!("resubscription timer stopping");
}

async fn resubscribe_pass(
    sequencer: &mut SubscriptionSequencer,
    writer: &UpstreamWriter,
    catalog: &InstrumentCatalog,
) -> Result<usize, RelayError> {
    if catalog.is_empty() {
        log::warn!("catalog refresh returned no markets, keeping prior subscriptions");
        return Ok(0);
    }
    sequencer.resubscribe(writer, catalog).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn boundary_wait_lands_on_five_minute_marks() {
        let at = |h: u32, m: u32, s: u32| {
            Local.with_ymd_and_hms(2025, 6, 2, h, m, s).unwrap()
        };
        assert_eq!(next_boundary_wait(at(9, 0, 0)), Duration::from_secs(300));
        assert_eq!(next_boundary_wait(at(9, 2, 30)), Duration::from_secs(150));
        assert_eq!(next_boundary_wait(at(9, 4, 59)), Duration::from_secs(1));
        assert_eq!(next_boundary_wait(at(9, 57, 1)), Duration::from_secs(179));
    }

    #[test]
    fn liveness_scan_matches_the_token_case_insensitively() {
        let liveness = LivenessState::new();
        assert!(liveness.last_ack().is_none());
        liveness.scan("d(2,1,'pong received')");
        assert!(liveness.last_ack().is_some());
    }

    #[test]
    fn liveness_ignores_unrelated_traffic() {
        let liveness = LivenessState::new();
        liveness.scan("d(8,1,'1.0950','','12:30:45')");
        assert!(liveness.last_ack().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_sends_on_the_interval_and_stops_on_cancel() {
        let session = Session {
            id: "S1".to_string(),
            host: "push.example.com".to_string(),
            phase: 2303,
        };
        let (writer, mut rx) = lib_market::upstream_channel();
        let cancel = CancellationToken::new();
        let liveness = Arc::new(LivenessState::new());

        let handle = tokio::spawn(run_keepalive(
            session,
            writer,
            Duration::from_secs(5),
            liveness,
            cancel.clone(),
        ));

        // Let the loop pass the first interval.
        tokio::time::sleep(Duration::from_secs(6)).await;
        cancel.cancel();
        handle.await.unwrap();

        let line = rx.try_recv().expect("one keepalive sent");
        assert!(line.contains("LS_op=constrain"));
        assert!(!line.contains("LS_table"));
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_exits_promptly_when_already_cancelled() {
        let session = Session {
            id: "S1".to_string(),
            host: "push.example.com".to_string(),
            phase: 2303,
        };
        let (writer, _rx) = lib_market::upstream_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // A pre-cancelled token ends the loop within one tick.
        run_keepalive(
            session,
            writer,
            Duration::from_secs(30),
            Arc::new(LivenessState::new()),
            cancel,
        )
        .await;
    }
}
