//! Append-only pulse log with a retention horizon.
//!
//! Pulses older than the retention window are filtered out of every read and
//! physically removed by [`PulseStore::purge_expired`], which the server runs
//! on an interval.

use crate::connection::{now_millis, ConnectionId};
use crate::validate::Violations;
use beacon_protocol::PulseView;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Default retention window (24 hours).
pub const PULSE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on records returned by one recent-pulses query.
pub const RECENT_PULSE_LIMIT: usize = 1000;

/// Decimal places kept for coordinates.
const COORDINATE_SCALE: f64 = 10_000.0;

/// Pulse store errors.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Rejected before storage.
    #[error(transparent)]
    Invalid(#[from] Violations),
}

/// A pulse submitted by a connection.
#[derive(Debug, Clone)]
pub struct Pulse {
    /// Client-side event time in epoch milliseconds.
    pub timestamp: u64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Submitting connection.
    pub origin: ConnectionId,
}

/// A pulse accepted into the log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPulse {
    pub id: u64,
    pub timestamp: u64,
    pub lat: f64,
    pub lon: f64,
    pub origin: ConnectionId,
    /// Server time of storage, epoch milliseconds.
    pub created_at: u64,
}

impl StoredPulse {
    /// The client-facing view, not flagged as the receiver's own.
    #[must_use]
    pub fn view(&self) -> PulseView {
        PulseView {
            id: self.id,
            timestamp: self.timestamp,
            lat: self.lat,
            lon: self.lon,
            is_yours: false,
        }
    }
}

/// Truncate a coordinate to four decimal places (toward zero).
///
/// Inputs that already have at most four decimals are kept as is, even when
/// their binary representation lands just below the scaled integer. The
/// tolerance covers only the rounding error of the multiplication, a few
/// ulps of the scaled value.
#[must_use]
pub fn truncate_coordinate(value: f64) -> f64 {
    let scaled = value * COORDINATE_SCALE;
    let nearest = scaled.round();
    let tolerance = 4.0 * f64::EPSILON * scaled.abs().max(1.0);
    let kept = if (scaled - nearest).abs() <= tolerance {
        nearest
    } else {
        scaled.trunc()
    };
    kept / COORDINATE_SCALE
}

/// Check a pulse's ranges.
///
/// # Errors
///
/// Returns every violated field.
pub fn validate_pulse(pulse: &Pulse) -> Result<(), Violations> {
    let mut v = Violations::new();
    v.check(pulse.timestamp > 0, "timestamp", "must be positive");
    v.check(
        pulse.lat.is_finite() && (-90.0..=90.0).contains(&pulse.lat),
        "lat",
        "must be within [-90, 90]",
    );
    v.check(
        pulse.lon.is_finite() && (-180.0..=180.0).contains(&pulse.lon),
        "lon",
        "must be within [-180, 180]",
    );
    v.into_result()
}

/// Pulse store configuration.
#[derive(Debug, Clone)]
pub struct PulseStoreConfig {
    /// How long a pulse stays visible after storage.
    pub retention: Duration,
    /// Hard cap on the records returned by one query.
    pub query_limit: usize,
}

impl Default for PulseStoreConfig {
    fn default() -> Self {
        Self {
            retention: PULSE_RETENTION,
            query_limit: RECENT_PULSE_LIMIT,
        }
    }
}

/// In-process append-only pulse log.
pub struct PulseStore {
    log: RwLock<VecDeque<StoredPulse>>,
    next_id: AtomicU64,
    config: PulseStoreConfig,
}

impl PulseStore {
    /// Create a store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PulseStoreConfig::default())
    }

    /// Create a store with custom configuration.
    #[must_use]
    pub fn with_config(config: PulseStoreConfig) -> Self {
        Self {
            log: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Validate, quantize, and store a pulse.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Invalid`] without storing anything if the
    /// timestamp or coordinates are out of range.
    pub fn append(&self, pulse: Pulse) -> Result<StoredPulse, PulseError> {
        self.append_at(pulse, now_millis())
    }

    /// [`append`](Self::append) with an explicit storage time.
    ///
    /// # Errors
    ///
    /// See [`append`](Self::append).
    pub fn append_at(&self, pulse: Pulse, now: u64) -> Result<StoredPulse, PulseError> {
        validate_pulse(&pulse)?;

        let stored = StoredPulse {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: pulse.timestamp,
            lat: truncate_coordinate(pulse.lat),
            lon: truncate_coordinate(pulse.lon),
            origin: pulse.origin,
            created_at: now,
        };
        self.log.write().push_back(stored.clone());

        trace!(id = stored.id, origin = %stored.origin, "Pulse stored");
        Ok(stored)
    }

    /// Pulses with `timestamp >= since`, in insertion order, capped at
    /// `min(limit, query_limit)`.
    #[must_use]
    pub fn query_recent(&self, since: u64, limit: usize) -> Vec<StoredPulse> {
        self.query_recent_at(since, limit, now_millis())
    }

    /// [`query_recent`](Self::query_recent) evaluated at `now`.
    #[must_use]
    pub fn query_recent_at(&self, since: u64, limit: usize, now: u64) -> Vec<StoredPulse> {
        let cap = limit.min(self.config.query_limit);
        self.log
            .read()
            .iter()
            .filter(|p| p.timestamp >= since && !self.is_expired(p, now))
            .take(cap)
            .cloned()
            .collect()
    }

    /// Number of live pulses with `timestamp >= since`.
    #[must_use]
    pub fn count_since(&self, since: u64) -> usize {
        let now = now_millis();
        self.log
            .read()
            .iter()
            .filter(|p| p.timestamp >= since && !self.is_expired(p, now))
            .count()
    }

    /// Remove expired pulses. Returns how many were removed.
    pub fn purge_expired(&self, now: u64) -> usize {
        let mut log = self.log.write();
        let before = log.len();
        log.retain(|p| !self.is_expired(p, now));
        let removed = before - log.len();
        if removed > 0 {
            debug!(removed, remaining = log.len(), "Purged expired pulses");
        }
        removed
    }

    /// Total records held, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    /// Whether the log holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }

    /// Retention window.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.config.retention
    }

    /// Start of the retention window relative to `now`, in epoch millis.
    #[must_use]
    pub fn horizon(&self, now: u64) -> u64 {
        now.saturating_sub(retention_millis(self.config.retention))
    }

    fn is_expired(&self, pulse: &StoredPulse, now: u64) -> bool {
        now.saturating_sub(pulse.created_at) >= retention_millis(self.config.retention)
    }
}

impl Default for PulseStore {
    fn default() -> Self {
        Self::new()
    }
}

fn retention_millis(retention: Duration) -> u64 {
    u64::try_from(retention.as_millis()).unwrap_or(u64::MAX)
}
