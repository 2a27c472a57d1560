//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon realtime server.
//!
//! This crate defines the frames exchanged between Beacon clients and the
//! server, and the codecs used to put them on a WebSocket.
//!
//! ## Frame Types
//!
//! - `ClientFrame` - pulses, room membership, shipment progress, pings
//! - `ServerEvent` - connection counts, pulse fan-out, room events, errors
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::send_pulse(1_700_000_000_000, 40.7128, -74.0060);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, ClientFrame, PulseView, ServerEvent};

/// Current protocol version, announced in [`ServerEvent::Connected`].
pub const PROTOCOL_VERSION: u8 = 1;
