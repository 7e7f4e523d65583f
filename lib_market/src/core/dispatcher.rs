//! # Relay Hub
//!
//! Fan-out of raw upstream frames to downstream consumers. A broadcast
//! snapshots the consumer set before delivering and reconciles removals
//! afterwards, so consumers attaching or detaching mid-broadcast never
//! invalidate the pass, and one broken consumer never blocks the rest.
//!
//! Each consumer gets an unbounded channel: the broadcast caller never
//! waits on a slow consumer, it only observes whether the consumer's
//! receiving task is still alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

struct ConsumerHandle {
    id: u64,
    sender: mpsc::UnboundedSender<Arc<str>>,
}

/// The current set of downstream consumer connections.
pub struct RelayHub {
    consumers: Mutex<Vec<ConsumerHandle>>,
    next_id: AtomicU64,
}

impl RelayHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self {
            consumers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a consumer and returns its id plus the receiving end it
    /// drains frames from. Channel closure (hub removal or `close_all`)
    /// is the consumer task's signal to shut its connection.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut consumers = self.consumers.lock().expect("hub lock poisoned");
        consumers.push(ConsumerHandle { id, sender: tx });
        (id, rx)
    }

    /// Removes one consumer. Safe to call for an id already removed.
    pub fn unregister(&self, id: u64) {
        let mut consumers = self.consumers.lock().expect("hub lock poisoned");
        consumers.retain(|c| c.id != id);
    }

    /// Delivers a frame to every registered consumer. Consumers whose
    /// channel is gone are dropped from the set after the pass.
    pub fn broadcast(&self, frame: Arc<str>) {
        let snapshot: Vec<(u64, mpsc::UnboundedSender<Arc<str>>)> = {
            let consumers = self.consumers.lock().expect("hub lock poisoned");
            consumers.iter().map(|c| (c.id, c.sender.clone())).collect()
        };

        let mut failed = Vec::new();
        for (id, sender) in snapshot {
            if sender.send(frame.clone()).is_err() {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut consumers = self.consumers.lock().expect("hub lock poisoned");
            consumers.retain(|c| !failed.contains(&c.id));
            log::info!("dropped {} dead consumer(s) from relay hub", failed.len());
        }
    }

    /// Closes every consumer by dropping its sender. Idempotent.
    pub fn close_all(&self) {
        let mut consumers = self.consumers.lock().expect("hub lock poisoned");
        let count = consumers.len();
        consumers.clear();
        if count > 0 {
            log::info!("closed {} downstream consumer(s)", count);
        }
    }

    /// Number of currently attached consumers.
    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().expect("hub lock poisoned").len()
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_survives_a_dead_consumer() {
        let hub = RelayHub::new();
        let (_a, mut rx_a) = hub.register();
        let (_b, rx_b) = hub.register();
        let (_c, mut rx_c) = hub.register();

        // Consumer b is gone before the broadcast.
        drop(rx_b);

        hub.broadcast(Arc::from("u(1,2)"));

        assert_eq!(rx_a.try_recv().unwrap().as_ref(), "u(1,2)");
        assert_eq!(rx_c.try_recv().unwrap().as_ref(), "u(1,2)");
        assert_eq!(hub.consumer_count(), 2);
    }

    #[test]
    fn frames_keep_send_order_per_consumer() {
        let hub = RelayHub::new();
        let (_id, mut rx) = hub.register();
        hub.broadcast(Arc::from("one"));
        hub.broadcast(Arc::from("two"));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "one");
        assert_eq!(rx.try_recv().unwrap().as_ref(), "two");
    }

    #[test]
    fn close_all_is_idempotent() {
        let hub = RelayHub::new();
        let (_id, mut rx) = hub.register();
        hub.close_all();
        hub.close_all();
        assert_eq!(hub.consumer_count(), 0);
        // The consumer observes closure, not a frame.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregister_unknown_id_is_a_no_op() {
        let hub = RelayHub::new();
        let (id, _rx) = hub.register();
        hub.unregister(9999);
        assert_eq!(hub.consumer_count(), 1);
        hub.unregister(id);
        assert_eq!(hub.consumer_count(), 0);
    }
}
