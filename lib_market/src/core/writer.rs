//! Serialized writer handle for the upstream connection.
//!
//! The WebSocket sink is owned by exactly one task; every logical sender
//! (sequencer, keepalive) holds a clone of [`UpstreamWriter`] and queues
//! lines through it, so writes to the socket are serialized even though
//! several activities produce them.

use tokio::sync::mpsc;

use crate::error::RelayError;

/// Cloneable handle that queues control lines for the upstream sink task.
#[derive(Clone)]
pub struct UpstreamWriter {
    tx: mpsc::UnboundedSender<String>,
}

/// Creates the writer handle and the receiving end the sink task drains.
pub fn upstream_channel() -> (UpstreamWriter, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UpstreamWriter { tx }, rx)
}

impl UpstreamWriter {
    /// Queues one control line. Fails only when the sink task is gone,
    /// which means the connection is down or draining.
    pub fn send_line(&self, line: String) -> Result<(), RelayError> {
        self.tx.send(line).map_err(|_| RelayError::WriterClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_arrive_in_send_order() {
        let (writer, mut rx) = upstream_channel();
        writer.send_line("first".into()).unwrap();
        writer.send_line("second".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert_eq!(rx.try_recv().unwrap(), "second");
    }

    #[test]
    fn send_after_receiver_drop_reports_closed() {
        let (writer, rx) = upstream_channel();
        drop(rx);
        assert!(matches!(
            writer.send_line("late".into()),
            Err(RelayError::WriterClosed)
        ));
    }
}
