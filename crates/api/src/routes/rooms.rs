//! Room routes

use std::io::ErrorKind;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use notex_shared::{generate_slug, validate_custom_slug, Room, RoomSlug};
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Attempts at finding an unused generated slug before falling back to a random suffix
const GENERATED_SLUG_ATTEMPTS: usize = 10;

/// Owner recorded for rooms first created by a save
const SAVE_OWNER: &str = "anon_save";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Exact slug chosen by the user
    pub slug: Option<String>,
    /// Prefix for a slug with a random suffix
    pub slug_prefix: Option<String>,
    #[serde(default)]
    pub owner: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveRoomRequest {
    pub content: Value,
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Create a room
pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> ApiResult<(StatusCode, Json<Room>)> {
    let expire_at = OffsetDateTime::now_utc() + state.config.room_ttl_empty();

    // User-chosen slug: taken is a conflict
    if let Some(custom) = req.slug.as_deref().filter(|s| !s.is_empty()) {
        validate_custom_slug(custom)?;
        let room = Room::new(RoomSlug::parse(custom)?, req.owner, expire_at);
        if !state.store.insert_room(&room).await? {
            return Err(ApiError::Conflict(format!("slug '{custom}' is already taken")));
        }
        tracing::info!(room = %room.slug, "Room created");
        return Ok((StatusCode::CREATED, Json(room)));
    }

    let candidates: Vec<String> = match req.slug_prefix.as_deref().filter(|p| !p.is_empty()) {
        Some(prefix) => vec![format!("{prefix}-{}", random_suffix())],
        None => (0..GENERATED_SLUG_ATTEMPTS)
            .map(|_| generate_slug())
            .chain(std::iter::once(format!("room-{}", random_suffix())))
            .collect(),
    };

    for candidate in candidates {
        let room = Room::new(RoomSlug::parse(&candidate)?, req.owner.clone(), expire_at);
        if state.store.insert_room(&room).await? {
            tracing::info!(room = %room.slug, "Room created");
            return Ok((StatusCode::CREATED, Json(room)));
        }
        tracing::debug!(room = %candidate, "Slug taken, trying another");
    }

    Err(ApiError::Conflict("could not find a free room slug".to_string()))
}

/// Get a room and push its expiry back
pub async fn get_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> ApiResult<Json<Room>> {
    let slug = RoomSlug::parse(&room)?;
    let record = state
        .store
        .get_room(&slug)
        .await?
        .ok_or(ApiError::RoomNotFound)?;

    let ttl = if record.has_content() {
        state.config.room_ttl_content()
    } else {
        state.config.room_ttl_empty()
    };
    let expire_at = OffsetDateTime::now_utc() + ttl;

    // Refresh in the background, don't block the read
    let store = state.store.clone();
    tokio::spawn(async move {
        if let Err(e) = store.touch_room(&slug, expire_at).await {
            tracing::warn!(room = %slug, error = %e, "Failed to refresh room expiry");
        }
    });

    Ok(Json(record))
}

/// Delete a room, its files and disconnect everyone in it
pub async fn delete_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> ApiResult<Json<Value>> {
    let slug = RoomSlug::parse(&room)?;

    // Counted before the room record goes; failures only get logged
    let files = match state.store.delete_files(&slug).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(room = %slug, error = %e, "Failed to delete file records");
            0
        }
    };

    let existed = state.store.delete_room(&slug).await?;

    let connections = state.hub.close_room(&slug);

    let dir = state.upload_root().join(slug.as_str());
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(room = %slug, path = %dir.display(), error = %e, "Failed to remove upload directory");
        }
    }

    tracing::info!(room = %slug, existed, files, connections, "Room deleted");

    Ok(Json(json!({ "message": "Room deleted" })))
}

/// Save document content, creating the room if needed
pub async fn save_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Json(req): Json<SaveRoomRequest>,
) -> ApiResult<Json<Value>> {
    let slug = RoomSlug::parse(&room)?;
    let expire_at = OffsetDateTime::now_utc() + state.config.room_ttl_content();

    state
        .store
        .save_content(&slug, req.content, SAVE_OWNER, expire_at)
        .await?;

    tracing::debug!(room = %slug, "Room saved");

    Ok(Json(json!({ "message": "Room saved" })))
}
