//! Live connection registry.
//!
//! Every connection owns a bounded outbox. All fan-out goes through
//! [`ConnectionRegistry`], which stamps each accepted event with a sequence
//! number under a single ingest lock, so every connection observes events in
//! acceptance order. Pushing into an outbox never waits: a full outbox drops
//! the event for that connection only.

use crate::connection::{now_millis, ConnectionId};
use beacon_protocol::ServerEvent;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The identifier is already live.
    #[error("Connection already registered: {0}")]
    AlreadyRegistered(String),

    /// The process is shutting down.
    #[error("Registry is draining, new connections are rejected")]
    Draining,

    /// Too many live connections.
    #[error("Maximum connections reached ({0})")]
    CapacityReached(usize),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Pending events buffered per connection before new ones are dropped.
    pub outbox_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            outbox_capacity: 1024,
        }
    }
}

/// An event queued for one connection.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Position of the event in the router's acceptance order.
    pub seq: u64,
    /// The event (shared between recipients).
    pub event: Arc<ServerEvent>,
}

/// Receiving half of a connection's outbox.
pub type Outbox = mpsc::Receiver<Delivery>;

struct ConnectionEntry {
    connected_at: u64,
    outbox: mpsc::Sender<Delivery>,
}

/// Tracks live connections and delivers events to them.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// Last assigned sequence number; held while an event is fanned out.
    ingest: Mutex<u64>,
    draining: AtomicBool,
    dropped: AtomicU64,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            connections: DashMap::new(),
            ingest: Mutex::new(0),
            draining: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            config,
        }
    }

    /// Register a connection and broadcast the new count to everyone.
    ///
    /// # Errors
    ///
    /// Fails when draining, at capacity, or if the id is already live.
    pub fn register(&self, id: &ConnectionId) -> Result<Outbox, RegistryError> {
        if self.is_draining() {
            return Err(RegistryError::Draining);
        }
        if self.connections.len() >= self.config.max_connections {
            return Err(RegistryError::CapacityReached(self.config.max_connections));
        }

        let (tx, rx) = mpsc::channel(self.config.outbox_capacity.max(1));
        match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyRegistered(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(ConnectionEntry {
                    connected_at: now_millis(),
                    outbox: tx,
                });
            }
        }

        debug!(connection = %id, "Connection registered");
        self.broadcast_count();
        Ok(rx)
    }

    /// Remove a connection and broadcast the new count.
    ///
    /// Returns `true` if the connection was live.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id.as_str()).is_some();
        if removed {
            debug!(connection = %id, "Connection unregistered");
            self.broadcast_count();
        }
        removed
    }

    /// Number of live connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Whether a connection is live.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// When a live connection registered, in epoch milliseconds.
    #[must_use]
    pub fn connected_at(&self, id: &str) -> Option<u64> {
        self.connections.get(id).map(|e| e.connected_at)
    }

    /// Stop accepting registrations. Live connections are untouched.
    pub fn begin_drain(&self) {
        if !self.draining.swap(true, Ordering::SeqCst) {
            debug!(live = self.count(), "Registry draining");
        }
    }

    /// Whether [`begin_drain`](Self::begin_drain) was called.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Events dropped because a recipient's outbox was full.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send an event to every live connection.
    ///
    /// Returns the number of outboxes that accepted it.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        self.fan_out(|_| Some(Arc::clone(&event)))
    }

    /// Send an event to a single connection.
    pub fn send_to(&self, id: &str, event: ServerEvent) -> bool {
        self.fan_out_to([id], Arc::new(event)) == 1
    }

    /// Deliver to every live connection the event chosen by `pick`.
    ///
    /// `pick` returning `None` skips that connection. The whole pass runs
    /// under the ingest lock with one sequence number.
    pub fn fan_out<F>(&self, mut pick: F) -> usize
    where
        F: FnMut(&ConnectionId) -> Option<Arc<ServerEvent>>,
    {
        let mut last_seq = self.ingest.lock();
        *last_seq += 1;
        let seq = *last_seq;

        let mut delivered = 0;
        for entry in self.connections.iter() {
            if let Some(event) = pick(entry.key()) {
                if self.push(entry.key(), &entry.outbox, Delivery { seq, event }) {
                    delivered += 1;
                }
            }
        }
        drop(last_seq);

        trace!(seq, recipients = delivered, "Fan-out complete");
        delivered
    }

    /// Deliver one event to each listed connection that is live.
    pub fn fan_out_to<'a, I>(&self, targets: I, event: Arc<ServerEvent>) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut last_seq = self.ingest.lock();
        *last_seq += 1;
        let seq = *last_seq;

        let mut delivered = 0;
        for id in targets {
            if let Some(entry) = self.connections.get(id) {
                let delivery = Delivery {
                    seq,
                    event: Arc::clone(&event),
                };
                if self.push(entry.key(), &entry.outbox, delivery) {
                    delivered += 1;
                }
            }
        }
        drop(last_seq);

        trace!(seq, recipients = delivered, "Targeted fan-out complete");
        delivered
    }

    fn push(&self, id: &ConnectionId, outbox: &mpsc::Sender<Delivery>, delivery: Delivery) -> bool {
        match outbox.try_send(delivery) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(d)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(connection = %id, event = d.event.name(), "Outbox full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(connection = %id, "Outbox closed");
                false
            }
        }
    }

    fn broadcast_count(&self) {
        // Read the count under the ingest lock so counts arrive in order.
        let mut last_seq = self.ingest.lock();
        *last_seq += 1;
        let seq = *last_seq;
        let event = Arc::new(ServerEvent::UserCount {
            count: self.connections.len(),
        });
        for entry in self.connections.iter() {
            let delivery = Delivery {
                seq,
                event: Arc::clone(&event),
            };
            self.push(entry.key(), &entry.outbox, delivery);
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(rx: &mut Outbox) -> Vec<usize> {
        let mut out = Vec::new();
        while let Ok(d) = rx.try_recv() {
            if let ServerEvent::UserCount { count } = *d.event {
                out.push(count);
            }
        }
        out
    }

    #[test]
    fn test_register_broadcasts_count() {
        let registry = ConnectionRegistry::new();

        let mut rx1 = registry.register(&"conn-1".into()).unwrap();
        assert_eq!(counts(&mut rx1), vec![1]);

        let mut rx2 = registry.register(&"conn-2".into()).unwrap();
        assert_eq!(registry.count(), 2);
        assert_eq!(counts(&mut rx1), vec![2]);
        assert_eq!(counts(&mut rx2), vec![2]);

        assert!(registry.unregister(&"conn-2".into()));
        assert_eq!(counts(&mut rx1), vec![1]);
        assert!(!registry.unregister(&"conn-2".into()));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ConnectionRegistry::new();
        let _rx = registry.register(&"conn-1".into()).unwrap();
        assert!(matches!(
            registry.register(&"conn-1".into()),
            Err(RegistryError::AlreadyRegistered(_))
        ));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_draining_rejects_new_connections() {
        let registry = ConnectionRegistry::new();
        let _rx = registry.register(&"conn-1".into()).unwrap();

        registry.begin_drain();
        assert!(matches!(
            registry.register(&"conn-2".into()),
            Err(RegistryError::Draining)
        ));
        assert!(registry.is_registered("conn-1"));
        assert!(registry.unregister(&"conn-1".into()));
    }

    #[test]
    fn test_capacity_limit() {
        let registry = ConnectionRegistry::with_config(RegistryConfig {
            max_connections: 1,
            outbox_capacity: 8,
        });
        let _rx = registry.register(&"conn-1".into()).unwrap();
        assert!(matches!(
            registry.register(&"conn-2".into()),
            Err(RegistryError::CapacityReached(1))
        ));
    }

    #[test]
    fn test_full_outbox_drops_without_blocking() {
        let registry = ConnectionRegistry::with_config(RegistryConfig {
            max_connections: 10,
            outbox_capacity: 2,
        });
        // The registration count occupies one slot.
        let _slow = registry.register(&"slow".into()).unwrap();

        assert_eq!(registry.broadcast(ServerEvent::Pong { timestamp: None }), 1);
        assert_eq!(registry.broadcast(ServerEvent::Pong { timestamp: None }), 0);
        assert_eq!(registry.dropped_deliveries(), 1);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let registry = ConnectionRegistry::new();
        let mut rx = registry.register(&"conn-1".into()).unwrap();
        registry.broadcast(ServerEvent::Pong { timestamp: Some(1) });
        registry.send_to("conn-1", ServerEvent::Pong { timestamp: Some(2) });

        let mut last = 0;
        while let Ok(d) = rx.try_recv() {
            assert!(d.seq > last);
            last = d.seq;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to("ghost", ServerEvent::Pong { timestamp: None }));
    }
}
