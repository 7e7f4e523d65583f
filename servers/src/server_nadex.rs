//! # Nadex Lightstreamer Relay
//!
//! Maintains one long-lived streaming session against the Nadex
//! Lightstreamer endpoint and relays every push frame to any number of
//! downstream WebSocket consumers.
//!
//! ## Execution Flow:
//! 1.  Load configuration (defaults → config file → environment/CLI).
//! 2.  Set up console + file logging.
//! 3.  Run the HTTP collaborators: authenticate, negotiate the streaming
//!     session, fetch the instrument catalog. Any failure here is fatal.
//! 4.  Start the downstream consumer server.
//! 5.  Run the stream orchestrator (connect, bootstrap, subscribe, stream)
//!     until shutdown or upstream closure.
//! 6.  Tear down in order: background tasks, upstream socket, consumers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lib_market::{NadexApiClient, RelayHub, TableRegistry};
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod nadex_logic;
use nadex_logic::{config, downstream, logger, upstream};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    let log_dir = config
        .log_dir
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    logger::setup_logging(&log_dir, &log_level)?;

    // --- Collaborators: fatal on failure, no retry at bootstrap ---
    let api = Arc::new(NadexApiClient::new(config.api_config()?));
    api.authenticate().await?;
    let session = api.create_session().await?;
    let catalog = api.fetch_catalog().await?;
    if catalog.instrument_count() == 0 {
        anyhow::bail!("instrument catalog is empty; nothing to subscribe");
    }

    let registry = Arc::new(TableRegistry::new());
    let hub = Arc::new(RelayHub::new());
    let cancel = CancellationToken::new();

    let downstream_handle = tokio::spawn(downstream::run(
        config.port(),
        hub.clone(),
        cancel.clone(),
    ));

    // Shutdown signals flip the shared token; flipping it twice is safe.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Ctrl-C received, initiating shutdown.");
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut term_signal =
                        signal::unix::signal(signal::unix::SignalKind::terminate())
                            .expect("failed to install SIGTERM handler");
                    term_signal.recv().await;
                    log::info!("SIGTERM received, initiating shutdown.");
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {}
        }
        signal_cancel.cancel();
    });

    let orchestrator = upstream::StreamOrchestrator {
        session,
        catalog,
        api,
        registry,
        hub,
        ping_interval: Duration::from_secs(config.ping_interval_seconds()),
        cancel: cancel.clone(),
    };
    let result = orchestrator.run().await;

    // The orchestrator already drained its own resources; make sure the
    // downstream server follows even when the upstream died on its own.
    cancel.cancel();
    let _ = downstream_handle.await;

    log::info!("Shutdown complete.");
    result
}
