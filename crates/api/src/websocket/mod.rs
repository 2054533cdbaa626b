//! WebSocket relay for collaborative rooms
//!
//! Clients connected to the same room exchange opaque binary payloads through the
//! server. Payloads whose first byte marks them as presence updates are also cached,
//! so clients joining later immediately see who else is in the room.
//!
//! # Architecture
//!
//! - **Events**: payload classification (presence vs. content)
//! - **Connection**: per-connection endpoint, bounded outbound queue and lifecycle
//! - **Hub**: room membership and presence cache, fan-out, room closure
//! - **Handler**: Axum route, admission and the per-connection pumps
//! - **Expiry**: background sweep closing rooms whose record expired

pub mod connection;
pub mod events;
pub mod expiry;
pub mod handler;
pub mod hub;

pub use connection::{Endpoint, EndpointId, EndpointState, Mailbox};
pub use events::{MessageKind, Payload, PRESENCE_DISCRIMINATOR};
pub use expiry::{room_sweeper_task, sweep_expired_rooms};
pub use handler::{ws_handler, SessionSettings};
pub use hub::{AdmissionTicket, Fanout, Hub, HubError, HubStats, Registration};
