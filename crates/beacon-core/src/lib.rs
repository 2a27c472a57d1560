//! # beacon-core
//!
//! Realtime building blocks for the Beacon server.
//!
//! - **Registry** - live connections, each with a bounded outbox
//! - **Room** - named broadcast scopes connections opt into
//! - **Router** - exclusive and room-scoped fan-out over the registry
//! - **Pulse** - append-only location log with a 24 hour horizon
//! - **Validate** - structured, field-by-field validation errors
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Registry   │────▶│   Outbox    │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod connection;
pub mod pulse;
pub mod registry;
pub mod room;
pub mod router;
pub mod validate;

pub use connection::{now_millis, ConnectionId};
pub use pulse::{Pulse, PulseError, PulseStore, PulseStoreConfig, StoredPulse};
pub use registry::{ConnectionRegistry, Delivery, Outbox, RegistryConfig, RegistryError};
pub use room::{shipment_room, Room, SHIPMENTS_ROOM};
pub use router::{Router, RouterConfig, RouterError, RouterStats};
pub use validate::{Violation, Violations};
