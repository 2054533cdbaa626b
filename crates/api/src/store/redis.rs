//! Redis-backed room store
//!
//! Layout:
//! - `notex:room:{slug}`: room record as JSON, expiring at the room's `expire_at`
//! - `notex:room:{slug}:files`: hash of file id -> file record JSON, same expiry

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use notex_shared::{FileRecord, Room, RoomSlug};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use super::{sort_files, RoomDirectory, RoomStore, StoreError, StoreResult};

const KEY_PREFIX: &str = "notex:room:";

const CONNECT_BASE_DELAY: Duration = Duration::from_millis(100);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPTS: usize = 8;

fn room_key(room: &RoomSlug) -> String {
    format!("{KEY_PREFIX}{room}")
}

fn files_key(room: &RoomSlug) -> String {
    format!("{KEY_PREFIX}{room}:files")
}

/// Room store on a shared, auto-reconnecting Redis connection
#[derive(Clone)]
pub struct RedisRoomStore {
    conn: ConnectionManager,
}

impl RedisRoomStore {
    /// Connect to `url`, retrying with exponential backoff while Redis comes up.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;

        let retry_strategy = ExponentialBackoff::from_millis(CONNECT_BASE_DELAY.as_millis() as u64)
            .max_delay(CONNECT_MAX_DELAY)
            .take(CONNECT_ATTEMPTS)
            .map(jitter);

        let conn = Retry::spawn(retry_strategy, || async {
            ConnectionManager::new(client.clone())
                .await
                .inspect_err(|e| {
                    tracing::warn!(error = %e, "Redis connection failed, retrying");
                })
        })
        .await?;

        tracing::info!("Connected to Redis room store");
        Ok(Self { conn })
    }

    /// Read a room record. Its `expire_at` is taken from the key's TTL, which
    /// `touch_room` moves without rewriting the record.
    async fn load_room(&self, room: &RoomSlug) -> StoreResult<Option<Room>> {
        let mut conn = self.conn.clone();
        let key = room_key(room);
        let (raw, ttl_ms): (Option<String>, i64) = redis::pipe()
            .get(&key)
            .pttl(&key)
            .query_async(&mut conn)
            .await?;

        let Some(json) = raw else {
            return Ok(None);
        };
        let mut record: Room = serde_json::from_str(&json)?;
        if ttl_ms > 0 {
            record.expire_at = OffsetDateTime::now_utc() + time::Duration::milliseconds(ttl_ms);
        }
        Ok(Some(record))
    }

    /// Write a room record with an optional `NX` condition. Returns whether the
    /// write happened.
    async fn write_room(&self, room: &Room, condition: Option<&str>) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(room)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(room_key(&room.slug)).arg(json);
        if let Some(condition) = condition {
            cmd.arg(condition);
        }
        cmd.arg("EXAT").arg(room.expire_at.unix_timestamp());

        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn expire_files_at(&self, room: &RoomSlug, expire_at: OffsetDateTime) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("EXPIREAT")
            .arg(files_key(room))
            .arg(expire_at.unix_timestamp())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for RedisRoomStore {
    async fn room_exists(&self, room: &RoomSlug) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(room_key(room)).await?;
        Ok(exists)
    }
}

#[async_trait]
impl RoomStore for RedisRoomStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn insert_room(&self, room: &Room) -> StoreResult<bool> {
        self.write_room(room, Some("NX")).await
    }

    async fn get_room(&self, room: &RoomSlug) -> StoreResult<Option<Room>> {
        self.load_room(room).await
    }

    async fn touch_room(&self, room: &RoomSlug, expire_at: OffsetDateTime) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let at = expire_at.unix_timestamp();
        let (touched, _files): (i64, i64) = redis::pipe()
            .cmd("EXPIREAT")
            .arg(room_key(room))
            .arg(at)
            .cmd("EXPIREAT")
            .arg(files_key(room))
            .arg(at)
            .query_async(&mut conn)
            .await?;
        Ok(touched > 0)
    }

    async fn save_content(
        &self,
        room: &RoomSlug,
        content: serde_json::Value,
        owner: &str,
        expire_at: OffsetDateTime,
    ) -> StoreResult<Room> {
        let mut record = self
            .load_room(room)
            .await?
            .unwrap_or_else(|| Room::new(room.clone(), owner, expire_at));
        record.content = Some(content);
        record.expire_at = expire_at;

        self.write_room(&record, None).await?;
        self.expire_files_at(room, expire_at).await?;
        Ok(record)
    }

    async fn delete_room(&self, room: &RoomSlug) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let (removed, _files): (i64, i64) = redis::pipe()
            .del(room_key(room))
            .del(files_key(room))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn insert_file(&self, file: &FileRecord) -> StoreResult<()> {
        let Some(room) = self.load_room(&file.room_id).await? else {
            return Err(StoreError::RoomNotFound(file.room_id.clone()));
        };

        let mut conn = self.conn.clone();
        let json = serde_json::to_string(file)?;
        let _: i64 = conn
            .hset(files_key(&file.room_id), file.id.to_string(), json)
            .await?;
        self.expire_files_at(&file.room_id, room.expire_at).await
    }

    async fn list_files(&self, room: &RoomSlug) -> StoreResult<Vec<FileRecord>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(files_key(room)).await?;

        let mut files = Vec::with_capacity(raw.len());
        for (field, json) in raw {
            match serde_json::from_str::<FileRecord>(&json) {
                Ok(file) => files.push(file),
                Err(e) => {
                    tracing::warn!(room = %room, file_id = %field, error = %e, "Skipping malformed file record");
                }
            }
        }
        sort_files(&mut files);
        Ok(files)
    }

    async fn get_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<Option<FileRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(files_key(room), file_id.to_string()).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn delete_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.hdel(files_key(room), file_id.to_string()).await?;
        Ok(removed > 0)
    }

    async fn delete_files(&self, room: &RoomSlug) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let (count, _removed): (i64, i64) = redis::pipe()
            .hlen(files_key(room))
            .del(files_key(room))
            .query_async(&mut conn)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
