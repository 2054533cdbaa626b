//! Room store
//!
//! Room records and file metadata live outside the relay process. The hub only ever
//! needs to know whether a room exists ([`RoomDirectory`]); the HTTP API needs the
//! full CRUD surface ([`RoomStore`]).

mod memory;
mod redis;

pub use self::memory::MemoryRoomStore;
pub use self::redis::RedisRoomStore;

use async_trait::async_trait;
use notex_shared::{FileRecord, Room, RoomSlug};
use time::OffsetDateTime;
use uuid::Uuid;

/// Room store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Malformed record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomSlug),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Existence check used when admitting connections and sweeping expired rooms.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn room_exists(&self, room: &RoomSlug) -> StoreResult<bool>;
}

/// Persistence of room records and their file metadata.
#[async_trait]
pub trait RoomStore: RoomDirectory {
    /// Short backend name for health reporting
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    /// Insert a room unless its slug is taken. Returns false when it already exists.
    async fn insert_room(&self, room: &Room) -> StoreResult<bool>;

    async fn get_room(&self, room: &RoomSlug) -> StoreResult<Option<Room>>;

    /// Move a room's expiry. Returns false when the room does not exist.
    async fn touch_room(&self, room: &RoomSlug, expire_at: OffsetDateTime) -> StoreResult<bool>;

    /// Store document content, creating the room owned by `owner` if needed.
    async fn save_content(
        &self,
        room: &RoomSlug,
        content: serde_json::Value,
        owner: &str,
        expire_at: OffsetDateTime,
    ) -> StoreResult<Room>;

    /// Delete a room and its file records. Returns false when it did not exist.
    async fn delete_room(&self, room: &RoomSlug) -> StoreResult<bool>;

    /// Record an uploaded file. The room must exist; the record shares its expiry.
    async fn insert_file(&self, file: &FileRecord) -> StoreResult<()>;

    /// Files of a room, oldest first
    async fn list_files(&self, room: &RoomSlug) -> StoreResult<Vec<FileRecord>>;

    async fn get_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<Option<FileRecord>>;

    async fn delete_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<bool>;

    /// Remove every file record of a room. Returns how many were removed.
    async fn delete_files(&self, room: &RoomSlug) -> StoreResult<usize>;
}

fn sort_files(files: &mut [FileRecord]) {
    files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
