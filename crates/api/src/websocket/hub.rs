//! Room hub
//!
//! The hub is the single authority over room membership and the presence cache.
//! Both tables live behind one readers-writer lock: registration, unregistration,
//! room closure and presence updates take the write lock, content fan-out takes the
//! read lock. Every operation is synchronous and never waits on a recipient, so a
//! slow connection can only ever lose its own messages.
//!
//! Admission races are settled with tickets. A ticket is taken before the external
//! room-existence check; if the room is force-closed after that point, registering
//! with the ticket fails instead of resurrecting the room.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use notex_shared::RoomSlug;
use tokio::time::Instant;

use super::connection::{Endpoint, EndpointId};
use super::events::{MessageKind, Payload};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Room {0} was closed during admission")]
    RoomClosed(RoomSlug),
    #[error("Admission ticket expired")]
    TicketExpired,
    #[error("Admission ticket for room {ticket} used for room {endpoint}")]
    RoomMismatch { ticket: RoomSlug, endpoint: RoomSlug },
}

/// Proof that a room was checked for existence at a given point in the hub's history.
#[derive(Debug, Clone)]
pub struct AdmissionTicket {
    room: RoomSlug,
    epoch: u64,
    issued_at: Instant,
}

impl AdmissionTicket {
    pub fn room(&self) -> &RoomSlug {
        &self.room
    }
}

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: usize,
    pub dropped: usize,
}

/// Statistics about hub state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of rooms with at least one member
    pub active_rooms: usize,
    /// Number of registered endpoints across all rooms
    pub active_connections: usize,
    /// Number of cached presence snapshots across all rooms
    pub cached_presence: usize,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    epoch: u64,
    closed_at: Instant,
}

#[derive(Default)]
struct HubTables {
    /// Room Membership Table: room -> registered endpoints
    members: HashMap<RoomSlug, HashMap<EndpointId, Endpoint>>,
    /// Presence Cache: room -> endpoint -> last presence payload
    presence: HashMap<RoomSlug, HashMap<EndpointId, Payload>>,
    /// Recent forced closures, kept for one ticket lifetime
    closed: HashMap<RoomSlug, Tombstone>,
    /// Bumped on every forced closure
    epoch: u64,
}

impl HubTables {
    fn is_member(&self, room: &RoomSlug, id: EndpointId) -> bool {
        self.members
            .get(room)
            .is_some_and(|members| members.contains_key(&id))
    }

    fn prune_tombstones(&mut self, now: Instant, ticket_ttl: Duration) {
        self.closed
            .retain(|_, tombstone| now.duration_since(tombstone.closed_at) <= ticket_ttl);
    }

    fn fan_out(&self, room: &RoomSlug, from: EndpointId, payload: &Payload) -> Fanout {
        let mut fanout = Fanout::default();
        if let Some(members) = self.members.get(room) {
            for (id, endpoint) in members {
                if *id == from {
                    continue;
                }
                if endpoint.try_deliver(payload) {
                    fanout.delivered += 1;
                } else {
                    fanout.dropped += 1;
                }
            }
        }
        fanout
    }

    /// Detach a room from both tables and leave a tombstone behind.
    fn take_room(&mut self, room: &RoomSlug, now: Instant) -> Vec<Endpoint> {
        self.epoch += 1;
        self.closed.insert(
            room.clone(),
            Tombstone {
                epoch: self.epoch,
                closed_at: now,
            },
        );
        self.presence.remove(room);
        self.members
            .remove(room)
            .map(|members| members.into_values().collect())
            .unwrap_or_default()
    }
}

struct HubInner {
    tables: RwLock<HubTables>,
    ticket_ttl: Duration,
}

/// Shared handle to the hub. Cloning is cheap.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub whose admission tickets stay valid for `ticket_ttl`.
    pub fn new(ticket_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                tables: RwLock::new(HubTables::default()),
                ticket_ttl,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HubTables> {
        self.inner
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubTables> {
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a ticket before checking that `room` exists.
    pub fn admission_ticket(&self, room: &RoomSlug) -> AdmissionTicket {
        let tables = self.read();
        AdmissionTicket {
            room: room.clone(),
            epoch: tables.epoch,
            issued_at: Instant::now(),
        }
    }

    /// Register an endpoint and replay the room's cached presence to it.
    ///
    /// Replay is best-effort: snapshots that do not fit in the endpoint's queue are
    /// skipped. The returned guard unregisters the endpoint when dropped.
    pub fn register(
        &self,
        endpoint: Endpoint,
        ticket: AdmissionTicket,
    ) -> Result<Registration, HubError> {
        let room = endpoint.room().clone();
        let id = endpoint.id();

        if ticket.room != room {
            return Err(HubError::RoomMismatch {
                ticket: ticket.room,
                endpoint: room,
            });
        }

        let now = Instant::now();
        if now.duration_since(ticket.issued_at) > self.inner.ticket_ttl {
            return Err(HubError::TicketExpired);
        }

        let mut tables = self.write();
        tables.prune_tombstones(now, self.inner.ticket_ttl);

        if let Some(tombstone) = tables.closed.get(&room) {
            if tombstone.epoch > ticket.epoch {
                return Err(HubError::RoomClosed(room));
            }
        }

        let mut replayed = 0;
        let mut skipped = 0;
        if let Some(snapshots) = tables.presence.get(&room) {
            for snapshot in snapshots.values() {
                if endpoint.try_deliver(snapshot) {
                    replayed += 1;
                } else {
                    skipped += 1;
                }
            }
        }

        endpoint.activate();
        tables.presence.entry(room.clone()).or_default();
        let members = tables.members.entry(room.clone()).or_default();
        members.insert(id, endpoint);
        let room_size = members.len();
        drop(tables);

        tracing::debug!(
            room = %room,
            endpoint_id = %id,
            room_size,
            replayed,
            skipped,
            "Connection joined room"
        );

        Ok(Registration {
            hub: self.clone(),
            room,
            id,
        })
    }

    /// Remove an endpoint from its room and release its outbound queue.
    ///
    /// Returns false if the endpoint was not registered.
    pub fn unregister(&self, room: &RoomSlug, id: EndpointId) -> bool {
        let mut tables = self.write();

        let Some(members) = tables.members.get_mut(room) else {
            return false;
        };
        let Some(endpoint) = members.remove(&id) else {
            return false;
        };
        let room_size = members.len();

        if room_size == 0 {
            tables.members.remove(room);
            tables.presence.remove(room);
        } else if let Some(snapshots) = tables.presence.get_mut(room) {
            snapshots.remove(&id);
        }
        drop(tables);

        endpoint.release();

        if room_size == 0 {
            tracing::debug!(room = %room, endpoint_id = %id, "Removed empty room");
        } else {
            tracing::debug!(
                room = %room,
                endpoint_id = %id,
                room_size,
                "Connection left room"
            );
        }
        true
    }

    /// Fan a payload out to every other member of `room`.
    ///
    /// Presence payloads also replace the sender's cached snapshot. Publishing from
    /// an endpoint that is not a member of `room` is a no-op.
    pub fn publish(&self, room: &RoomSlug, from: EndpointId, payload: &[u8]) -> Fanout {
        let kind = MessageKind::classify(payload);
        let payload: Payload = Arc::from(payload);

        let fanout = match kind {
            MessageKind::Presence => {
                let mut tables = self.write();
                if !tables.is_member(room, from) {
                    return Fanout::default();
                }
                tables
                    .presence
                    .entry(room.clone())
                    .or_default()
                    .insert(from, Arc::clone(&payload));
                tables.fan_out(room, from, &payload)
            }
            MessageKind::Content => {
                let tables = self.read();
                if !tables.is_member(room, from) {
                    return Fanout::default();
                }
                tables.fan_out(room, from, &payload)
            }
        };

        tracing::trace!(
            room = %room,
            endpoint_id = %from,
            kind = kind.as_str(),
            bytes = payload.len(),
            recipients = fanout.delivered,
            dropped = fanout.dropped,
            "Broadcast payload to room"
        );

        fanout
    }

    /// Disconnect every member of `room` and forget its state.
    ///
    /// Returns the number of endpoints that were released.
    pub fn close_room(&self, room: &RoomSlug) -> usize {
        let now = Instant::now();
        let endpoints = {
            let mut tables = self.write();
            tables.prune_tombstones(now, self.inner.ticket_ttl);
            tables.take_room(room, now)
        };

        let closed = endpoints.len();
        for endpoint in endpoints {
            endpoint.release();
        }

        if closed > 0 {
            tracing::info!(room = %room, connections = closed, "Room closed");
        }
        closed
    }

    /// Close every room. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let now = Instant::now();
        let endpoints: Vec<Endpoint> = {
            let mut tables = self.write();
            let rooms: Vec<RoomSlug> = tables.members.keys().cloned().collect();
            rooms
                .iter()
                .flat_map(|room| tables.take_room(room, now))
                .collect()
        };

        let closed = endpoints.len();
        for endpoint in endpoints {
            endpoint.release();
        }
        closed
    }

    /// Whether `id` is currently registered in `room`
    pub fn is_member(&self, room: &RoomSlug, id: EndpointId) -> bool {
        self.read().is_member(room, id)
    }

    /// Cached presence snapshot of one endpoint
    pub fn presence_snapshot(&self, room: &RoomSlug, id: EndpointId) -> Option<Payload> {
        self.read()
            .presence
            .get(room)
            .and_then(|snapshots| snapshots.get(&id))
            .cloned()
    }

    /// Number of connections in a room
    pub fn member_count(&self, room: &RoomSlug) -> usize {
        self.read().members.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of cached presence snapshots in a room
    pub fn presence_count(&self, room: &RoomSlug) -> usize {
        self.read().presence.get(room).map(|p| p.len()).unwrap_or(0)
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.read().members.len()
    }

    /// Rooms that currently have members
    pub fn active_rooms(&self) -> Vec<RoomSlug> {
        self.read().members.keys().cloned().collect()
    }

    pub fn stats(&self) -> HubStats {
        let tables = self.read();
        HubStats {
            active_rooms: tables.members.len(),
            active_connections: tables.members.values().map(|m| m.len()).sum(),
            cached_presence: tables.presence.values().map(|p| p.len()).sum(),
        }
    }
}

/// Registration of one endpoint. Dropping it unregisters the endpoint, so every
/// exit path of a connection task releases its hub state.
#[must_use = "dropping a Registration unregisters the endpoint"]
pub struct Registration {
    hub: Hub,
    room: RoomSlug,
    id: EndpointId,
}

impl Registration {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn room(&self) -> &RoomSlug {
        &self.room
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(&self.room, self.id);
    }
}
