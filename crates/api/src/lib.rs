//! Notex API Library
//!
//! This crate contains the collaboration relay and the room/file HTTP API of the
//! Notex server.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

use std::sync::Arc;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use config::StoreBackend;
use store::{MemoryRoomStore, RedisRoomStore, RoomStore, StoreError};

/// Open the room store selected by the configuration.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn RoomStore>, StoreError> {
    match config.room_store {
        StoreBackend::Redis => Ok(Arc::new(RedisRoomStore::connect(&config.redis_url).await?)),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory room store; rooms are lost on restart");
            Ok(Arc::new(MemoryRoomStore::new()))
        }
    }
}
