//! WebSocket connection handling.
//!
//! Each socket is registered with the router, which hands back the
//! connection's outbox. One task per connection then multiplexes the
//! outbox and the inbound stream until either side closes.

use crate::api::auth::account_from_headers;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use beacon_core::{ConnectionId, Pulse, PulseError};
use beacon_ledger::{LedgerError, StoreError};
use beacon_protocol::{codec, codes, ClientFrame, ServerEvent, PROTOCOL_VERSION};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

/// How outbound events are put on the socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary messages.
    Msgpack,
}

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub encoding: Encoding,
}

type Sender = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let account = account_from_headers(&headers);

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, account, params.encoding))
}

/// Per-connection context.
struct Session {
    id: ConnectionId,
    account: Option<Uuid>,
    encoding: Encoding,
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    account: Option<Uuid>,
    encoding: Encoding,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session {
        id: ConnectionId::generate(),
        account,
        encoding,
    };

    let mut outbox = match state.router.connect(&session.id) {
        Ok(outbox) => outbox,
        Err(e) => {
            warn!(connection = %session.id, error = %e, "Connection rejected");
            metrics::record_error("connection_rejected");
            let event = ServerEvent::error(codes::UNAVAILABLE, e.to_string());
            let _ = send_event(&mut sender, &event, session.encoding).await;
            let _ = sender.close().await;
            return;
        }
    };
    let _metrics_guard = ConnectionMetricsGuard::new();
    debug!(connection = %session.id, account = ?session.account, "WebSocket connected");

    let connected = ServerEvent::connected(
        session.id.as_str(),
        PROTOCOL_VERSION,
        state.config.heartbeat_ms(),
    );
    if let Err(e) = send_event(&mut sender, &connected, session.encoding).await {
        error!(connection = %session.id, error = %e, "Failed to send connected event");
        state.router.disconnect(&session.id);
        return;
    }

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms.max(1));
    let mut last_seen = Instant::now();

    // Pings keep passive clients alive: their pongs count as traffic.
    let ping_period = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = tokio::time::Instant::from_std(last_seen + idle_timeout);

        tokio::select! {
            biased;

            delivery = outbox.recv() => {
                let Some(delivery) = delivery else { break };
                trace!(connection = %session.id, seq = delivery.seq, event = delivery.event.name(), "Delivering");
                if send_event(&mut sender, &delivery.event, session.encoding).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        let start = Instant::now();
                        let reply = match codec::decode_json::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(frame, &session, &state).await,
                            Err(e) => Some(invalid_frame(&session, &e)),
                        };
                        if let Some(reply) = reply {
                            if send_event(&mut sender, &reply, session.encoding).await.is_err() {
                                break;
                            }
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        // A binary client gets binary replies.
                        session.encoding = Encoding::Msgpack;
                        read_buffer.extend_from_slice(&data);

                        if handle_binary(&mut read_buffer, &session, &state, &mut sender).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %session.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %session.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %session.id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            () = tokio::time::sleep_until(deadline) => {
                debug!(connection = %session.id, "Heartbeat timeout");
                break;
            }
        }
    }

    state.router.disconnect(&session.id);
    debug!(connection = %session.id, "WebSocket disconnected");
}

/// Decode and handle every complete frame in the buffer.
async fn handle_binary(
    buffer: &mut BytesMut,
    session: &Session,
    state: &AppState,
    sender: &mut Sender,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let reply = match codec::decode_from::<ClientFrame>(buffer) {
            Ok(Some(frame)) => handle_frame(frame, session, state).await,
            Ok(None) => break,
            Err(e) => {
                // The stream position is lost; start over with the next message.
                buffer.clear();
                Some(invalid_frame(session, &e))
            }
        };
        if let Some(reply) = reply {
            send_event(sender, &reply, session.encoding).await?;
        }
    }
    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(())
}

fn invalid_frame(session: &Session, e: &codec::ProtocolError) -> ServerEvent {
    debug!(connection = %session.id, error = %e, "Invalid frame");
    metrics::record_error("invalid_frame");
    ServerEvent::error(codes::INVALID_FRAME, e.to_string())
}

/// Handle one decoded frame. Returns the direct reply, if any.
async fn handle_frame(frame: ClientFrame, session: &Session, state: &AppState) -> Option<ServerEvent> {
    let id = &session.id;
    match frame {
        ClientFrame::SendPulse { timestamp, lat, lon } => {
            let pulse = Pulse {
                timestamp,
                lat,
                lon,
                origin: id.clone(),
            };
            match state.pulses.append(pulse) {
                Ok(stored) => {
                    metrics::record_pulse();
                    let recipients = state.router.broadcast_exclusive(id.as_str(), stored.view());
                    metrics::record_delivery("new_pulse", recipients);
                    None
                }
                Err(PulseError::Invalid(violations)) => {
                    debug!(connection = %id, error = %violations, "Pulse rejected");
                    metrics::record_error("invalid_pulse");
                    Some(ServerEvent::error(codes::INVALID_PULSE, violations.to_string()))
                }
            }
        }

        ClientFrame::RequestRecentPulses => {
            let since = state.pulses.horizon(beacon_core::now_millis());
            let pulses = state
                .pulses
                .query_recent(since, state.config.pulses.recent_limit)
                .into_iter()
                .map(|p| {
                    let view = p.view();
                    if p.origin == *id {
                        view.confirmed()
                    } else {
                        view
                    }
                })
                .collect();
            Some(ServerEvent::RecentPulses { pulses })
        }

        ClientFrame::Subscribe { room } => match state.router.subscribe(id, &room) {
            Ok(()) => Some(ServerEvent::Ack { room }),
            Err(e) => {
                debug!(connection = %id, room = %room, error = %e, "Subscribe rejected");
                Some(ServerEvent::error(codes::ROOM_REJECTED, e.to_string()))
            }
        },

        ClientFrame::Unsubscribe { room } => match state.router.unsubscribe(id.as_str(), &room) {
            Ok(()) => Some(ServerEvent::Ack { room }),
            Err(e) => Some(ServerEvent::error(codes::ROOM_REJECTED, e.to_string())),
        },

        ClientFrame::ShipmentUpdate {
            shipment_id,
            progress,
        } => {
            let Some(actor) = session.account else {
                return Some(ServerEvent::error(
                    codes::FORBIDDEN,
                    "shipment updates require an authenticated connection",
                ));
            };
            let Ok(unit_id) = Uuid::parse_str(&shipment_id) else {
                return Some(ServerEvent::error(
                    codes::NOT_FOUND,
                    format!("shipment not found: {shipment_id}"),
                ));
            };

            match state.ledger.shipments().update_progress(actor, unit_id, progress).await {
                Ok(unit) => {
                    state.publish_progress(&shipment_id, unit.progress);
                    None
                }
                Err(e) => {
                    metrics::record_error(e.kind());
                    Some(ServerEvent::error(error_code(&e), e.to_string()))
                }
            }
        }

        ClientFrame::Ping { timestamp } => Some(ServerEvent::Pong { timestamp }),
    }
}

/// Wire error code for a ledger failure.
fn error_code(e: &LedgerError) -> u16 {
    match e {
        LedgerError::Validation(_) | LedgerError::InvalidTransition { .. } => codes::INVALID_FRAME,
        LedgerError::NotFound { .. } => codes::NOT_FOUND,
        LedgerError::Forbidden { .. } | LedgerError::PlanNotAllowed { .. } => codes::FORBIDDEN,
        LedgerError::DependencyTimeout { .. }
        | LedgerError::Conflict { .. }
        | LedgerError::Store(StoreError::Unavailable(_)) => codes::UNAVAILABLE,
        _ => codes::INTERNAL,
    }
}

/// Send an event to the WebSocket.
async fn send_event(sender: &mut Sender, event: &ServerEvent, encoding: Encoding) -> Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(event)?),
        Encoding::Msgpack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    let len = match &message {
        Message::Text(t) => t.len(),
        Message::Binary(b) => b.len(),
        _ => 0,
    };
    metrics::record_message(len, "outbound");
    sender.send(message).await?;
    Ok(())
}
