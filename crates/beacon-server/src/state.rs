//! Shared server state.

use crate::config::Config;
use crate::metrics;
use crate::middleware::RateLimitState;
use beacon_core::{now_millis, shipment_room, PulseStore, Router, SHIPMENTS_ROOM};
use beacon_protocol::ServerEvent;
use beacon_ledger::{Ledger, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// State shared by every handler.
pub struct AppState {
    /// Connections, rooms, and fan-out.
    pub router: Router,
    /// The pulse log.
    pub pulses: PulseStore,
    /// Monetization services.
    pub ledger: Ledger,
    /// Per-client request limit on the HTTP API.
    pub rate_limit: RateLimitState,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// State over an in-memory ledger.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), config.ledger());
        Self::with_ledger(config, ledger)
    }

    /// State over an existing ledger.
    #[must_use]
    pub fn with_ledger(config: Config, ledger: Ledger) -> Self {
        Self {
            router: Router::with_config(config.router()),
            pulses: PulseStore::with_config(config.pulse_store()),
            ledger,
            rate_limit: RateLimitState::from_config(&config.limits.rate_limit),
            config,
        }
    }

    /// Announce a shipment's progress to the feed room and its own room.
    pub fn publish_progress(&self, shipment_id: &str, progress: u8) -> usize {
        let room = shipment_room(shipment_id);
        let event = ServerEvent::ShipmentMoved {
            shipment_id: shipment_id.to_string(),
            progress,
        };
        let recipients = self
            .router
            .broadcast_to_rooms(&[SHIPMENTS_ROOM, room.as_str()], event);
        metrics::record_delivery("shipment_moved", recipients);
        recipients
    }

    /// Purge expired pulses and stale rate-limit windows, then publish
    /// router totals.
    pub fn sweep(&self) -> usize {
        let removed = self.pulses.purge_expired(now_millis());
        metrics::record_purge(removed);
        self.rate_limit.prune();

        let stats = self.router.stats();
        metrics::record_router_stats(stats.room_count, stats.dropped_deliveries);
        removed
    }
}

/// Run [`AppState::sweep`] every `pulses.sweep_interval_secs` until
/// `shutdown` flips to `true`.
pub fn spawn_sweeper(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.pulses.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = state.sweep();
                    debug!(removed, "Retention sweep");
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Retention sweeper stopped");
    })
}
