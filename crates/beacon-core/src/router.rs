//! Event broadcast router for Beacon.
//!
//! The router owns the connection registry and the room table, and exposes
//! the two fan-out policies: exclusive broadcast (the originator gets a
//! confirmation, everyone else gets the event) and room-scoped broadcast.

use crate::connection::ConnectionId;
use crate::registry::{ConnectionRegistry, Outbox, RegistryConfig, RegistryError};
use crate::room::{validate_room_name, Room};
use beacon_protocol::{PulseView, ServerEvent};
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// The connection is not live.
    #[error("Connection not registered: {0}")]
    NotConnected(String),

    /// Not subscribed to room.
    #[error("Not subscribed to room: {0}")]
    NotSubscribed(String),

    /// Already subscribed to room.
    #[error("Already subscribed to room: {0}")]
    AlreadySubscribed(String),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Maximum rooms reached.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of rooms.
    pub max_rooms: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Whether to delete rooms when their last member leaves.
    pub auto_delete_empty_rooms: bool,
    /// Connection registry settings.
    pub registry: RegistryConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_subscriptions_per_connection: 100,
            auto_delete_empty_rooms: true,
            registry: RegistryConfig::default(),
        }
    }
}

/// The central event router.
pub struct Router {
    registry: ConnectionRegistry,
    /// Rooms indexed by name.
    rooms: DashMap<String, Room>,
    /// Connection subscriptions (connection_id -> set of room names).
    subscriptions: DashMap<ConnectionId, DashSet<String>>,
    config: RouterConfig,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            registry: ConnectionRegistry::with_config(config.registry.clone()),
            rooms: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    /// The underlying connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connection_count: self.registry.count(),
            room_count: self.rooms.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
            dropped_deliveries: self.registry.dropped_deliveries(),
        }
    }

    /// Register a new connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionRegistry::register`].
    pub fn connect(&self, connection_id: &ConnectionId) -> Result<Outbox, RegistryError> {
        self.registry.register(connection_id)
    }

    /// Tear down a connection: leave every room, then unregister.
    ///
    /// Returns `true` if the connection was live.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        self.unsubscribe_all(connection_id.as_str());
        self.registry.unregister(connection_id)
    }

    /// Stop accepting new connections.
    pub fn begin_drain(&self) {
        self.registry.begin_drain();
    }

    /// Subscribe a connection to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid, the connection is not
    /// live, or limits are exceeded.
    pub fn subscribe(&self, connection_id: &ConnectionId, room_name: &str) -> Result<(), RouterError> {
        validate_room_name(room_name).map_err(RouterError::InvalidRoom)?;

        if !self.registry.is_registered(connection_id.as_str()) {
            return Err(RouterError::NotConnected(connection_id.to_string()));
        }

        let conn_subs = self
            .subscriptions
            .entry(connection_id.clone())
            .or_default();

        if conn_subs.contains(room_name) {
            return Err(RouterError::AlreadySubscribed(room_name.to_string()));
        }

        if conn_subs.len() >= self.config.max_subscriptions_per_connection {
            return Err(RouterError::MaxSubscriptionsReached);
        }

        if !self.rooms.contains_key(room_name) && self.rooms.len() >= self.config.max_rooms {
            return Err(RouterError::MaxRoomsReached);
        }

        let mut room = self
            .rooms
            .entry(room_name.to_string())
            .or_insert_with(|| {
                debug!(room = %room_name, "Creating new room");
                Room::new(room_name)
            });

        room.join(connection_id);
        conn_subs.insert(room_name.to_string());

        debug!(
            room = %room_name,
            connection = %connection_id,
            members = room.len(),
            "Subscribed"
        );

        Ok(())
    }

    /// Unsubscribe a connection from a room.
    ///
    /// # Errors
    ///
    /// Returns an error if not subscribed.
    pub fn unsubscribe(&self, connection_id: &str, room_name: &str) -> Result<(), RouterError> {
        let removed = self
            .subscriptions
            .get(connection_id)
            .and_then(|subs| subs.remove(room_name))
            .is_some();
        if !removed {
            return Err(RouterError::NotSubscribed(room_name.to_string()));
        }

        self.leave_room(connection_id, room_name);
        Ok(())
    }

    /// Unsubscribe a connection from all rooms.
    pub fn unsubscribe_all(&self, connection_id: &str) {
        if let Some((_, rooms)) = self.subscriptions.remove(connection_id) {
            for room_name in rooms.iter() {
                self.leave_room(connection_id, room_name.as_str());
            }
        }

        debug!(connection = %connection_id, "Unsubscribed from all rooms");
    }

    fn leave_room(&self, connection_id: &str, room_name: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_name) {
            room.leave(connection_id);

            if self.config.auto_delete_empty_rooms && room.is_empty() {
                drop(room); // Release the lock
                self.rooms.remove_if(room_name, |_, r| r.is_empty());
                debug!(room = %room_name, "Deleted empty room");
            }
        }
    }

    /// Send an event to every live connection.
    pub fn broadcast_all(&self, event: ServerEvent) -> usize {
        self.registry.broadcast(event)
    }

    /// Send an event to one connection.
    pub fn send_to(&self, connection_id: &str, event: ServerEvent) -> bool {
        self.registry.send_to(connection_id, event)
    }

    /// Fan out a pulse: `new_pulse` to everyone except the originator, which
    /// receives `pulse_confirmed` with `is_yours` set instead.
    ///
    /// Returns the number of connections the event reached.
    pub fn broadcast_exclusive(&self, origin: &str, pulse: PulseView) -> usize {
        let confirmed = Arc::new(ServerEvent::PulseConfirmed {
            pulse: pulse.confirmed(),
        });
        let shared = Arc::new(ServerEvent::NewPulse {
            pulse: PulseView {
                is_yours: false,
                ..pulse
            },
        });

        let count = self.registry.fan_out(|id| {
            if id.as_str() == origin {
                Some(Arc::clone(&confirmed))
            } else {
                Some(Arc::clone(&shared))
            }
        });
        trace!(origin = %origin, recipients = count, "Exclusive broadcast");
        count
    }

    /// Send an event to the members of a room.
    pub fn broadcast_to_room(&self, room_name: &str, event: ServerEvent) -> usize {
        self.broadcast_to_rooms(&[room_name], event)
    }

    /// Send an event to the members of several rooms. A connection that is
    /// in more than one of them receives the event once.
    pub fn broadcast_to_rooms(&self, room_names: &[&str], event: ServerEvent) -> usize {
        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for name in room_names {
            if let Some(room) = self.rooms.get(*name) {
                targets.extend(room.members());
            }
        }

        if targets.is_empty() {
            trace!(rooms = ?room_names, "Room broadcast without members");
            return 0;
        }

        let count = self
            .registry
            .fan_out_to(targets.iter().map(ConnectionId::as_str), Arc::new(event));
        trace!(rooms = ?room_names, recipients = count, "Room broadcast");
        count
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_name: &str) -> bool {
        self.rooms.contains_key(room_name)
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, room_name: &str) -> usize {
        self.rooms.get(room_name).map(|r| r.len()).unwrap_or(0)
    }

    /// Get the rooms a connection is subscribed to.
    #[must_use]
    pub fn connection_rooms(&self, connection_id: &str) -> Vec<String> {
        self.subscriptions
            .get(connection_id)
            .map(|s| s.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of connected clients.
    pub connection_count: usize,
    /// Number of active rooms.
    pub room_count: usize,
    /// Total number of room subscriptions.
    pub total_subscriptions: usize,
    /// Events dropped because a recipient could not keep up.
    pub dropped_deliveries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{shipment_room, SHIPMENTS_ROOM};

    fn drain(rx: &mut Outbox) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(d) = rx.try_recv() {
            out.push((*d.event).clone());
        }
        out
    }

    fn without_counts(events: Vec<ServerEvent>) -> Vec<ServerEvent> {
        events
            .into_iter()
            .filter(|e| !matches!(e, ServerEvent::UserCount { .. }))
            .collect()
    }

    fn pulse(id: u64) -> PulseView {
        PulseView {
            id,
            timestamp: 1_700_000_000_000,
            lat: 10.0,
            lon: 20.0,
            is_yours: false,
        }
    }

    #[test]
    fn test_exclusive_broadcast() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let mut rx_a = router.connect(&a).unwrap();
        let mut rx_b = router.connect(&"b".into()).unwrap();
        let mut rx_c = router.connect(&"c".into()).unwrap();

        assert_eq!(router.broadcast_exclusive("a", pulse(1)), 3);

        let a_events = without_counts(drain(&mut rx_a));
        assert_eq!(a_events.len(), 1);
        match &a_events[0] {
            ServerEvent::PulseConfirmed { pulse } => assert!(pulse.is_yours),
            other => panic!("Expected PulseConfirmed, got {:?}", other),
        }

        for rx in [&mut rx_b, &mut rx_c] {
            let events = without_counts(drain(rx));
            assert_eq!(events.len(), 1);
            match &events[0] {
                ServerEvent::NewPulse { pulse } => assert!(!pulse.is_yours),
                other => panic!("Expected NewPulse, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_room_broadcast_reaches_members_only() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let mut rx_a = router.connect(&a).unwrap();
        let mut rx_b = router.connect(&b).unwrap();

        router.subscribe(&a, SHIPMENTS_ROOM).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let event = ServerEvent::ShipmentMoved {
            shipment_id: "s1".into(),
            progress: 40,
        };
        assert_eq!(router.broadcast_to_room(SHIPMENTS_ROOM, event.clone()), 1);
        assert_eq!(drain(&mut rx_a), vec![event]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_multi_room_broadcast_deduplicates() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let mut rx_a = router.connect(&a).unwrap();
        let unit_room = shipment_room("s1");
        router.subscribe(&a, SHIPMENTS_ROOM).unwrap();
        router.subscribe(&a, &unit_room).unwrap();
        drain(&mut rx_a);

        let event = ServerEvent::ShipmentMoved {
            shipment_id: "s1".into(),
            progress: 90,
        };
        let count = router.broadcast_to_rooms(&[SHIPMENTS_ROOM, unit_room.as_str()], event);
        assert_eq!(count, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn test_disconnect_clears_subscriptions() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let _rx = router.connect(&a).unwrap();
        router.subscribe(&a, "room-1").unwrap();
        router.subscribe(&a, "room-2").unwrap();

        assert!(router.disconnect(&a));

        assert!(!router.room_exists("room-1"));
        assert!(!router.room_exists("room-2"));
        assert!(router.connection_rooms("a").is_empty());
        assert_eq!(router.connection_count(), 0);
    }

    #[test]
    fn test_subscribe_requires_live_connection() {
        let router = Router::new();
        assert!(matches!(
            router.subscribe(&"ghost".into(), SHIPMENTS_ROOM),
            Err(RouterError::NotConnected(_))
        ));
    }

    #[test]
    fn test_router_invalid_room() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let _rx = router.connect(&a).unwrap();

        assert!(router.subscribe(&a, "").is_err());
        assert!(router.subscribe(&a, "$system").is_err());
    }

    #[test]
    fn test_router_already_subscribed() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let _rx = router.connect(&a).unwrap();

        router.subscribe(&a, "test").unwrap();
        assert!(matches!(
            router.subscribe(&a, "test"),
            Err(RouterError::AlreadySubscribed(_))
        ));
        router.unsubscribe("a", "test").unwrap();
        assert!(matches!(
            router.unsubscribe("a", "test"),
            Err(RouterError::NotSubscribed(_))
        ));
    }

    #[test]
    fn test_subscription_limit() {
        let router = Router::with_config(RouterConfig {
            max_subscriptions_per_connection: 1,
            ..RouterConfig::default()
        });
        let a = ConnectionId::from("a");
        let _rx = router.connect(&a).unwrap();

        router.subscribe(&a, "one").unwrap();
        assert!(matches!(
            router.subscribe(&a, "two"),
            Err(RouterError::MaxSubscriptionsReached)
        ));
    }

    #[test]
    fn test_per_connection_order_matches_acceptance() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let mut rx_a = router.connect(&a).unwrap();
        let _rx_b = router.connect(&"b".into()).unwrap();
        router.subscribe(&a, SHIPMENTS_ROOM).unwrap();
        drain(&mut rx_a);

        router.broadcast_exclusive("b", pulse(1));
        router.broadcast_to_room(
            SHIPMENTS_ROOM,
            ServerEvent::ShipmentMoved {
                shipment_id: "s".into(),
                progress: 1,
            },
        );
        router.broadcast_exclusive("b", pulse(2));

        let mut seqs = Vec::new();
        while let Ok(d) = rx_a.try_recv() {
            seqs.push(d.seq);
        }
        assert_eq!(seqs.len(), 3);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_router_stats() {
        let router = Router::new();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let _rx_a = router.connect(&a).unwrap();
        let _rx_b = router.connect(&b).unwrap();

        router.subscribe(&a, "room-1").unwrap();
        router.subscribe(&a, "room-2").unwrap();
        router.subscribe(&b, "room-1").unwrap();

        let stats = router.stats();
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.total_subscriptions, 3);
    }
}
