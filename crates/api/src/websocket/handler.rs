//! WebSocket handler for Axum
//!
//! Admission happens before the upgrade: the room id is validated, an admission
//! ticket is taken, and the room directory is asked (with a timeout) whether the
//! room exists. Only then is the connection upgraded and registered with the hub.
//!
//! Each admitted connection runs two cooperating halves:
//! - the outbound pump (spawned) drains the endpoint's queue into the socket and
//!   keeps the connection alive with pings
//! - the inbound pump (inline) publishes every frame it reads to the room

use std::fmt::Display;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use notex_shared::RoomSlug;
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::{RoomDirectory, StoreError};

use super::connection::{Endpoint, EndpointId, EndpointState, Mailbox};
use super::hub::{AdmissionTicket, Hub, HubError};

/// Close code sent when the room disappeared between admission and registration
pub const CLOSE_ROOM_GONE: u16 = 4404;

/// How long a draining connection may spend flushing already-queued payloads
pub const FLUSH_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    room: Option<String>,
}

/// Per-connection transport settings
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    pub max_message_bytes: usize,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_capacity: config.ws_queue_capacity,
            max_message_bytes: config.ws_max_message_bytes,
            ping_interval: config.ws_ping_interval(),
            idle_timeout: config.ws_idle_timeout(),
        }
    }
}

/// Why a room-existence check refused admission
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Room {0} does not exist")]
    NotFound(RoomSlug),
    #[error("Room existence check timed out")]
    Timeout,
    #[error("Room existence check failed: {0}")]
    Store(#[from] StoreError),
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::NotFound(_) => ApiError::RoomNotFound,
            AdmissionError::Timeout | AdmissionError::Store(_) => ApiError::ServiceUnavailable,
        }
    }
}

/// Why a connection stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// The client sent a close frame
    ClientClosed,
    /// The inbound stream ended
    TransportClosed,
    /// Reading from the socket failed
    TransportError,
    /// No frame arrived within the idle timeout
    IdleTimeout,
    /// The hub released the endpoint (unregister, room closure, shutdown)
    Released,
}

impl DrainReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainReason::ClientClosed => "client_closed",
            DrainReason::TransportClosed => "transport_closed",
            DrainReason::TransportError => "transport_error",
            DrainReason::IdleTimeout => "idle_timeout",
            DrainReason::Released => "released",
        }
    }
}

/// WebSocket handler for `/ws/:room` and `/ws?room=`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    path: Option<Path<String>>,
    Query(params): Query<WebSocketQuery>,
) -> ApiResult<Response> {
    let raw = params
        .room
        .or_else(|| path.map(|Path(room)| room))
        .ok_or_else(|| ApiError::BadRequest("room is required".to_string()))?;
    let room = RoomSlug::parse(&raw)?;

    // The ticket must predate the existence check
    let ticket = state.hub.admission_ticket(&room);

    if let Err(e) =
        check_room_exists(state.store.as_ref(), &room, state.config.room_check_timeout()).await
    {
        tracing::warn!(room = %room, error = %e, "WebSocket admission rejected");
        return Err(e.into());
    }

    let settings = SessionSettings::from_config(&state.config);
    let hub = state.hub.clone();

    tracing::debug!(room = %room, "WebSocket connection upgrade requested");

    Ok(ws
        .max_message_size(settings.max_message_bytes)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let (endpoint, mailbox) = Endpoint::open(room, settings.queue_capacity);
            let _ = run_session(sink, stream, hub, endpoint, mailbox, ticket, settings).await;
        }))
}

/// Ask the room directory whether `room` exists, giving up after `timeout`.
pub async fn check_room_exists<D>(
    directory: &D,
    room: &RoomSlug,
    timeout: Duration,
) -> Result<(), AdmissionError>
where
    D: RoomDirectory + ?Sized,
{
    match tokio::time::timeout(timeout, directory.room_exists(room)).await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(AdmissionError::NotFound(room.clone())),
        Ok(Err(e)) => Err(AdmissionError::Store(e)),
        Err(_) => Err(AdmissionError::Timeout),
    }
}

/// Drive one upgraded connection from registration to release.
///
/// Returns why the connection stopped reading, or the registration error after the
/// socket was closed with [`CLOSE_ROOM_GONE`].
pub async fn run_session<Si, St, E>(
    mut sink: Si,
    stream: St,
    hub: Hub,
    endpoint: Endpoint,
    mailbox: Mailbox,
    ticket: AdmissionTicket,
    settings: SessionSettings,
) -> Result<DrainReason, HubError>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let room = endpoint.room().clone();
    let endpoint_id = endpoint.id();
    let lifecycle = mailbox.lifecycle();

    let registration = match hub.register(endpoint, ticket) {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(room = %room, endpoint_id = %endpoint_id, error = %e, "Registration rejected");
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_ROOM_GONE,
                    reason: "room no longer exists".into(),
                })))
                .await;
            let _ = sink.close().await;
            lifecycle.advance(EndpointState::Closed);
            return Err(e);
        }
    };

    tracing::info!(room = %room, endpoint_id = %endpoint_id, "WebSocket connection admitted");

    let cancel = mailbox.cancel_token();

    let send_task = tokio::spawn(pump_outbound(
        sink,
        mailbox,
        settings.ping_interval,
        FLUSH_GRACE,
    ));

    let reason = pump_inbound(
        stream,
        &hub,
        &room,
        endpoint_id,
        cancel.clone(),
        settings.idle_timeout,
    )
    .await;

    lifecycle.advance(EndpointState::Draining);
    drop(registration);
    cancel.cancel();

    if let Err(e) = send_task.await {
        tracing::error!(endpoint_id = %endpoint_id, error = ?e, "WebSocket send task failed");
    }
    lifecycle.advance(EndpointState::Closed);

    tracing::info!(
        room = %room,
        endpoint_id = %endpoint_id,
        reason = reason.as_str(),
        "WebSocket connection closed"
    );

    Ok(reason)
}

/// Read frames and publish them to the room until the connection should drain.
pub async fn pump_inbound<S, E>(
    mut stream: S,
    hub: &Hub,
    room: &RoomSlug,
    endpoint_id: EndpointId,
    cancel: CancellationToken,
    idle_timeout: Duration,
) -> DrainReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return DrainReason::Released,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => return DrainReason::IdleTimeout,
            Ok(None) => return DrainReason::TransportClosed,
            Ok(Some(Err(e))) => {
                tracing::debug!(endpoint_id = %endpoint_id, error = %e, "WebSocket read failed");
                return DrainReason::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Binary(bytes) => {
                hub.publish(room, endpoint_id, &bytes);
            }
            Message::Text(text) => {
                hub.publish(room, endpoint_id, text.as_bytes());
            }
            Message::Close(_) => return DrainReason::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => {
                // Axum answers pings; any frame counts as activity
            }
        }
    }
}

/// Write queued payloads to the socket until the queue closes or the connection is
/// cancelled, then flush what is left and send a close frame.
pub async fn pump_outbound<Si>(
    mut sink: Si,
    mut mailbox: Mailbox,
    ping_interval: Duration,
    flush_grace: Duration,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let cancel = mailbox.cancel_token();
    let endpoint_id = mailbox.id();
    // However this task ends, the receive side stops too
    let _stop_inbound = cancel.clone().drop_guard();

    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            next = mailbox.recv() => match next {
                Some(payload) => {
                    if let Err(e) = sink.send(Message::Binary(payload.to_vec())).await {
                        tracing::debug!(endpoint_id = %endpoint_id, error = %e, "WebSocket write failed");
                        cancel.cancel();
                        return;
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    tracing::debug!(endpoint_id = %endpoint_id, error = %e, "WebSocket ping failed");
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    let flush = async {
        let mut flushed = 0usize;
        while let Some(payload) = mailbox.try_recv() {
            if sink.send(Message::Binary(payload.to_vec())).await.is_err() {
                break;
            }
            flushed += 1;
        }
        flushed
    };
    match tokio::time::timeout(flush_grace, flush).await {
        Ok(flushed) if flushed > 0 => {
            tracing::debug!(endpoint_id = %endpoint_id, flushed, "Flushed queued payloads");
        }
        Ok(_) => {}
        Err(_) => {
            tracing::debug!(endpoint_id = %endpoint_id, "Flush grace period elapsed");
        }
    }

    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        })))
        .await;
    let _ = sink.close().await;
}
