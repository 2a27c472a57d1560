//! Frame types for the Beacon protocol.
//!
//! Clients send [`ClientFrame`]s and receive [`ServerEvent`]s. Both are
//! internally tagged by a `type` field so the same definitions work for the
//! binary MessagePack codec and for JSON text messages.

use serde::{Deserialize, Serialize};

/// Frame type identifiers for client frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientFrameType {
    SendPulse,
    RequestRecentPulses,
    Subscribe,
    Unsubscribe,
    ShipmentUpdate,
    Ping,
}

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Submit a location pulse.
    #[serde(rename = "send_pulse")]
    SendPulse {
        /// Client-side event time in epoch milliseconds.
        timestamp: u64,
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lon: f64,
    },

    /// Ask for the pulses of the last 24 hours.
    #[serde(rename = "request_recent_pulses")]
    RequestRecentPulses,

    /// Join a room.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Room name.
        room: String,
    },

    /// Leave a room.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Room name.
        room: String,
    },

    /// Report progress on an owned shipment.
    #[serde(rename = "shipment_update")]
    ShipmentUpdate {
        /// Shipment identifier.
        shipment_id: String,
        /// Progress percentage (0-100).
        progress: u8,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> ClientFrameType {
        match self {
            ClientFrame::SendPulse { .. } => ClientFrameType::SendPulse,
            ClientFrame::RequestRecentPulses => ClientFrameType::RequestRecentPulses,
            ClientFrame::Subscribe { .. } => ClientFrameType::Subscribe,
            ClientFrame::Unsubscribe { .. } => ClientFrameType::Unsubscribe,
            ClientFrame::ShipmentUpdate { .. } => ClientFrameType::ShipmentUpdate,
            ClientFrame::Ping { .. } => ClientFrameType::Ping,
        }
    }

    /// Create a new SendPulse frame.
    #[must_use]
    pub fn send_pulse(timestamp: u64, lat: f64, lon: f64) -> Self {
        ClientFrame::SendPulse {
            timestamp,
            lat,
            lon,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(room: impl Into<String>) -> Self {
        ClientFrame::Subscribe { room: room.into() }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(room: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe { room: room.into() }
    }
}

/// A pulse as seen by a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseView {
    /// Stored pulse identifier.
    pub id: u64,
    /// Client-side event time in epoch milliseconds.
    pub timestamp: u64,
    /// Latitude, truncated to four decimal places.
    pub lat: f64,
    /// Longitude, truncated to four decimal places.
    pub lon: f64,
    /// Whether the receiving connection sent this pulse.
    pub is_yours: bool,
}

impl PulseView {
    /// The same pulse, flagged as belonging to the receiver.
    #[must_use]
    pub fn confirmed(&self) -> Self {
        Self {
            is_yours: true,
            ..self.clone()
        }
    }
}

/// Error codes carried by [`ServerEvent::Error`].
pub mod codes {
    pub const INVALID_FRAME: u16 = 1001;
    pub const INVALID_PULSE: u16 = 1002;
    pub const ROOM_REJECTED: u16 = 1003;
    pub const NOT_FOUND: u16 = 1004;
    pub const FORBIDDEN: u16 = 1005;
    pub const UNAVAILABLE: u16 = 1006;
    pub const INTERNAL: u16 = 1007;
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Connection established.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Number of live connections changed.
    #[serde(rename = "user_count")]
    UserCount {
        /// Current number of live connections.
        count: usize,
    },

    /// A pulse sent by another connection.
    #[serde(rename = "new_pulse")]
    NewPulse {
        /// The pulse.
        pulse: PulseView,
    },

    /// Confirmation of a pulse sent by the receiving connection.
    #[serde(rename = "pulse_confirmed")]
    PulseConfirmed {
        /// The pulse, with `is_yours` set.
        pulse: PulseView,
    },

    /// Pulses of the retention window.
    #[serde(rename = "recent_pulses")]
    RecentPulses {
        /// Stored pulses, oldest first.
        pulses: Vec<PulseView>,
    },

    /// Progress of a shipment changed.
    #[serde(rename = "shipment_moved")]
    ShipmentMoved {
        /// Shipment identifier.
        shipment_id: String,
        /// New progress percentage.
        progress: u8,
    },

    /// Room subscription accepted.
    #[serde(rename = "ack")]
    Ack {
        /// Room the acknowledgement refers to.
        room: String,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Short name used for logging and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::UserCount { .. } => "user_count",
            ServerEvent::NewPulse { .. } => "new_pulse",
            ServerEvent::PulseConfirmed { .. } => "pulse_confirmed",
            ServerEvent::RecentPulses { .. } => "recent_pulses",
            ServerEvent::ShipmentMoved { .. } => "shipment_moved",
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    /// Create a new Connected event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Error event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let frame = ClientFrame::send_pulse(1, 0.0, 0.0);
        assert_eq!(frame.frame_type(), ClientFrameType::SendPulse);

        let frame = ClientFrame::subscribe("shipments");
        assert_eq!(frame.frame_type(), ClientFrameType::Subscribe);
    }

    #[test]
    fn test_pulse_view_confirmed() {
        let view = PulseView {
            id: 7,
            timestamp: 1_700_000_000_000,
            lat: 51.5073,
            lon: -0.1277,
            is_yours: false,
        };
        let confirmed = view.confirmed();
        assert!(confirmed.is_yours);
        assert_eq!(confirmed.id, view.id);
        assert_eq!(confirmed.lat, view.lat);
    }

    #[test]
    fn test_pulse_view_field_names() {
        let view = PulseView {
            id: 1,
            timestamp: 2,
            lat: 3.0,
            lon: 4.0,
            is_yours: true,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["isYours"], true);
    }

    #[test]
    fn test_client_frame_json_shape() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"send_pulse","timestamp":10,"lat":1.5,"lon":2.5}"#)
                .unwrap();
        assert_eq!(frame, ClientFrame::send_pulse(10, 1.5, 2.5));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping { timestamp: None });
    }
}
