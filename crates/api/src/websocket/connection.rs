//! Connection endpoints
//!
//! An endpoint is one live WebSocket connection as seen by the hub. Opening an
//! endpoint yields two halves:
//!
//! - [`Endpoint`]: handed to the hub on registration. It holds the only producer
//!   handle of the bounded outbound queue, so dropping it (on unregister or room
//!   closure) closes the queue.
//! - [`Mailbox`]: kept by the connection's tasks. It owns the consumer side of the
//!   queue and shares the cancellation signal and lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use notex_shared::RoomSlug;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::Payload;

/// Opaque identity of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Endpoint lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EndpointState {
    /// Room existence confirmed, not yet visible to the hub
    Admitting = 0,
    /// Registered; receive and send tasks running
    Active = 1,
    /// Unregistered or closing; tasks are stopping
    Draining = 2,
    /// Transport released. Terminal.
    Closed = 3,
}

impl EndpointState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EndpointState::Admitting,
            1 => EndpointState::Active,
            2 => EndpointState::Draining,
            _ => EndpointState::Closed,
        }
    }
}

/// Shared, monotonic lifecycle cell
#[derive(Debug, Default)]
pub struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub fn current(&self) -> EndpointState {
        EndpointState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` unless already past it. Returns the state before the call.
    pub fn advance(&self, next: EndpointState) -> EndpointState {
        EndpointState::from_u8(self.0.fetch_max(next as u8, Ordering::AcqRel))
    }
}

/// Hub-side half of a connection
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    room: RoomSlug,
    outbound: mpsc::Sender<Payload>,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
}

impl Endpoint {
    /// Create a new endpoint bound to `room` with an outbound queue of `capacity` payloads.
    pub fn open(room: RoomSlug, capacity: usize) -> (Endpoint, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = EndpointId::new();
        let lifecycle = Arc::new(Lifecycle::default());
        let cancel = CancellationToken::new();

        let endpoint = Endpoint {
            id,
            room: room.clone(),
            outbound: tx,
            lifecycle: Arc::clone(&lifecycle),
            cancel: cancel.clone(),
        };
        let mailbox = Mailbox {
            id,
            room,
            queue: rx,
            lifecycle,
            cancel,
        };
        (endpoint, mailbox)
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn room(&self) -> &RoomSlug {
        &self.room
    }

    pub fn state(&self) -> EndpointState {
        self.lifecycle.current()
    }

    pub(crate) fn activate(&self) {
        self.lifecycle.advance(EndpointState::Active);
    }

    /// Enqueue without waiting.
    ///
    /// Returns false when the payload was dropped because the queue is full or
    /// its consumer is gone.
    pub fn try_deliver(&self, payload: &Payload) -> bool {
        match self.outbound.try_send(Arc::clone(payload)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(
                    endpoint_id = %self.id,
                    room = %self.room,
                    "Outbound queue full, dropping payload"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Start draining the connection and close its outbound queue.
    pub fn release(self) {
        self.lifecycle.advance(EndpointState::Draining);
        self.cancel.cancel();
        // `self.outbound` is dropped here, closing the queue.
    }
}

/// Task-side half of a connection
#[derive(Debug)]
pub struct Mailbox {
    id: EndpointId,
    room: RoomSlug,
    queue: mpsc::Receiver<Payload>,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
}

impl Mailbox {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn room(&self) -> &RoomSlug {
        &self.room
    }

    pub fn state(&self) -> EndpointState {
        self.lifecycle.current()
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the next outbound payload. `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.queue.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        self.queue.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomSlug {
        RoomSlug::parse("ab-12").unwrap()
    }

    #[test]
    fn test_lifecycle_only_moves_forward() {
        let lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.current(), EndpointState::Admitting);

        lifecycle.advance(EndpointState::Draining);
        assert_eq!(lifecycle.advance(EndpointState::Active), EndpointState::Draining);
        assert_eq!(lifecycle.current(), EndpointState::Draining);

        lifecycle.advance(EndpointState::Closed);
        assert_eq!(lifecycle.current(), EndpointState::Closed);
    }

    #[tokio::test]
    async fn test_try_deliver_drops_when_full() {
        let (endpoint, mut mailbox) = Endpoint::open(room(), 2);
        let payload: Payload = Arc::from(&[0u8, 1][..]);

        assert!(endpoint.try_deliver(&payload));
        assert!(endpoint.try_deliver(&payload));
        assert!(!endpoint.try_deliver(&payload));

        assert_eq!(mailbox.recv().await.as_deref(), Some(&[0u8, 1][..]));
        assert!(endpoint.try_deliver(&payload));
    }

    #[tokio::test]
    async fn test_release_closes_queue_and_cancels() {
        let (endpoint, mut mailbox) = Endpoint::open(room(), 4);
        let cancel = mailbox.cancel_token();
        let payload: Payload = Arc::from(&[0u8][..]);

        endpoint.activate();
        assert_eq!(mailbox.state(), EndpointState::Active);

        assert!(endpoint.try_deliver(&payload));
        endpoint.release();

        assert!(cancel.is_cancelled());
        assert_eq!(mailbox.state(), EndpointState::Draining);
        // Already-queued payloads are still readable, then the queue reports closed.
        assert!(mailbox.recv().await.is_some());
        assert!(mailbox.recv().await.is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (endpoint, _mailbox) = Endpoint::open(room(), 0);
        let payload: Payload = Arc::from(&[0u8][..]);
        assert!(endpoint.try_deliver(&payload));
    }
}
