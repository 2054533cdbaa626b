//! Room expiry sweep
//!
//! Room records expire in the store on their own. The sweep notices rooms that
//! still have live connections but no record any more and closes them in the hub.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::{RoomDirectory, RoomStore};

use super::handler::{check_room_exists, AdmissionError};
use super::hub::Hub;

/// Check every active room once. Returns the number of rooms closed.
///
/// Rooms whose check fails or times out are left alone until the next sweep.
pub async fn sweep_expired_rooms<D>(hub: &Hub, directory: &D, check_timeout: Duration) -> usize
where
    D: RoomDirectory + ?Sized,
{
    let mut closed = 0;

    for room in hub.active_rooms() {
        match check_room_exists(directory, &room, check_timeout).await {
            Ok(()) => {}
            Err(AdmissionError::NotFound(_)) => {
                let connections = hub.close_room(&room);
                tracing::info!(room = %room, connections, "Closed expired room");
                closed += 1;
            }
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "Room expiry check failed");
            }
        }
    }

    closed
}

/// Background task that periodically closes expired rooms until `shutdown` fires.
pub async fn room_sweeper_task(
    hub: Hub,
    store: Arc<dyn RoomStore>,
    interval: Duration,
    check_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(interval);
    // First tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let closed = sweep_expired_rooms(&hub, store.as_ref(), check_timeout).await;
                if closed > 0 {
                    tracing::debug!(closed, "Room expiry sweep finished");
                }
            }
        }
    }

    tracing::debug!("Room sweeper stopped");
}
