//! Downstream consumer endpoint: any number of WebSocket clients may
//! attach at `/ws` and receive every upstream frame verbatim. A consumer
//! that stops draining or disconnects is dropped from the hub without
//! touching the others.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use lib_market::RelayHub;
use tokio_util::sync::CancellationToken;

pub async fn run(port: u16, hub: Arc<RelayHub>, cancel: CancellationToken) {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(hub);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("downstream bind failed on {addr}: {e}");
            cancel.cancel();
            return;
        }
    };
    log::info!("downstream server listening on {addr}");

    let shutdown = cancel.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            log::info!("downstream server shutting down");
        })
        .await
    {
        log::error!("downstream server error: {e}");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<RelayHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, hub))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<RelayHub>) {
    let (consumer_id, mut frames) = hub.register();
    log::info!("consumer {consumer_id} connected");

    loop {
        tokio::select! {
            // Inbound traffic only matters for detecting disconnects; the
            // relay accepts no consumer commands.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    // Hub closed us (drain or eviction): close gracefully.
                    None => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    hub.unregister(consumer_id);
    log::info!("consumer {consumer_id} disconnected");
}
