//! In-process room store for development and tests

use std::collections::HashMap;

use async_trait::async_trait;
use notex_shared::{FileRecord, Room, RoomSlug};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{sort_files, RoomDirectory, RoomStore, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    rooms: HashMap<RoomSlug, Room>,
    files: HashMap<RoomSlug, HashMap<Uuid, FileRecord>>,
}

impl Tables {
    /// Live room record; expired records are treated as absent.
    fn live_room(&self, slug: &RoomSlug, now: OffsetDateTime) -> Option<&Room> {
        self.rooms.get(slug).filter(|room| !room.is_expired_at(now))
    }

    /// Drop every expired record along with its files
    fn prune_expired(&mut self, now: OffsetDateTime) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, room| !room.is_expired_at(now));
        let rooms = &self.rooms;
        self.files.retain(|slug, _| rooms.contains_key(slug));
        before - self.rooms.len()
    }

    fn evict_if_expired(&mut self, slug: &RoomSlug, now: OffsetDateTime) {
        if self.rooms.get(slug).is_some_and(|room| room.is_expired_at(now)) {
            self.rooms.remove(slug);
            self.files.remove(slug);
        }
    }
}

/// Room store kept in memory. Expired records read as absent and are pruned
/// whenever a room is written.
#[derive(Default)]
pub struct MemoryRoomStore {
    tables: RwLock<Tables>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomDirectory for MemoryRoomStore {
    async fn room_exists(&self, room: &RoomSlug) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.live_room(room, OffsetDateTime::now_utc()).is_some())
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_room(&self, room: &Room) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let pruned = tables.prune_expired(OffsetDateTime::now_utc());
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired rooms");
        }
        if tables.rooms.contains_key(&room.slug) {
            return Ok(false);
        }
        tables.rooms.insert(room.slug.clone(), room.clone());
        Ok(true)
    }

    async fn get_room(&self, room: &RoomSlug) -> StoreResult<Option<Room>> {
        let tables = self.tables.read().await;
        Ok(tables.live_room(room, OffsetDateTime::now_utc()).cloned())
    }

    async fn touch_room(&self, room: &RoomSlug, expire_at: OffsetDateTime) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        tables.evict_if_expired(room, OffsetDateTime::now_utc());
        match tables.rooms.get_mut(room) {
            Some(record) => {
                record.expire_at = expire_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_content(
        &self,
        room: &RoomSlug,
        content: serde_json::Value,
        owner: &str,
        expire_at: OffsetDateTime,
    ) -> StoreResult<Room> {
        let mut tables = self.tables.write().await;
        tables.prune_expired(OffsetDateTime::now_utc());
        let record = tables
            .rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(room.clone(), owner, expire_at));
        record.content = Some(content);
        record.expire_at = expire_at;
        Ok(record.clone())
    }

    async fn delete_room(&self, room: &RoomSlug) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let now = OffsetDateTime::now_utc();
        let existed = tables.live_room(room, now).is_some();
        tables.rooms.remove(room);
        tables.files.remove(room);
        Ok(existed)
    }

    async fn insert_file(&self, file: &FileRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .live_room(&file.room_id, OffsetDateTime::now_utc())
            .is_none()
        {
            return Err(StoreError::RoomNotFound(file.room_id.clone()));
        }
        tables
            .files
            .entry(file.room_id.clone())
            .or_default()
            .insert(file.id, file.clone());
        Ok(())
    }

    async fn list_files(&self, room: &RoomSlug) -> StoreResult<Vec<FileRecord>> {
        let tables = self.tables.read().await;
        if tables.live_room(room, OffsetDateTime::now_utc()).is_none() {
            return Ok(Vec::new());
        }
        let mut files: Vec<FileRecord> = tables
            .files
            .get(room)
            .map(|files| files.values().cloned().collect())
            .unwrap_or_default();
        sort_files(&mut files);
        Ok(files)
    }

    async fn get_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<Option<FileRecord>> {
        let tables = self.tables.read().await;
        if tables.live_room(room, OffsetDateTime::now_utc()).is_none() {
            return Ok(None);
        }
        Ok(tables
            .files
            .get(room)
            .and_then(|files| files.get(&file_id))
            .cloned())
    }

    async fn delete_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .files
            .get_mut(room)
            .is_some_and(|files| files.remove(&file_id).is_some()))
    }

    async fn delete_files(&self, room: &RoomSlug) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        Ok(tables.files.remove(room).map(|files| files.len()).unwrap_or(0))
    }
}
