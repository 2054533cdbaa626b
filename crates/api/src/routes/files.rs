//! File upload routes
//!
//! Uploaded files are written to `{UPLOAD_DIR}/{room}/{file id}{ext}` and served
//! back through the static `/uploads` mount. Metadata lives in the room store.

use std::io::ErrorKind;
use std::path::Path as FsPath;

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use notex_shared::{FileRecord, RoomSlug};
use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    routes::USER_ID_HEADER,
    state::AppState,
    store::RoomDirectory,
};

/// Multipart field carrying the file
const FILE_FIELD: &str = "file";

const MAX_EXTENSION_LEN: usize = 16;

/// File record as returned to clients
#[derive(Debug, Serialize)]
pub struct FileResponse {
    #[serde(flatten)]
    pub file: FileRecord,
    pub url: String,
}

impl From<FileRecord> for FileResponse {
    fn from(file: FileRecord) -> Self {
        let url = file.public_url();
        Self { file, url }
    }
}

fn too_large(limit: usize) -> ApiError {
    ApiError::BadRequest(format!("File exceeds {}MB limit", limit / (1024 * 1024)))
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(limit)
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

fn io_error(err: std::io::Error) -> ApiError {
    tracing::error!(error = %err, "Upload I/O error");
    ApiError::Internal
}

/// Extension kept on disk: `.` plus a short alphanumeric suffix, or nothing.
fn stored_extension(file_name: &str) -> String {
    FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn remove_quietly(path: &FsPath) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

/// Stream one multipart field to `path`, enforcing `limit`. Returns the size written.
async fn write_field(mut field: Field<'_>, path: &FsPath, limit: usize) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut size: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        size += chunk.len() as u64;
        if size > limit as u64 {
            return Err(too_large(limit));
        }
        file.write_all(&chunk).await.map_err(io_error)?;
    }

    file.flush().await.map_err(io_error)?;
    Ok(size)
}

/// Upload a file into a room
pub async fn upload_file(
    State(state): State<AppState>,
    Path(room): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    let slug = RoomSlug::parse(&room)?;
    let limit = state.config.max_upload_bytes;

    if !state.store.room_exists(&slug).await? {
        return Err(ApiError::RoomNotFound);
    }

    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, limit))?
        {
            Some(field) if field.name() == Some(FILE_FIELD) => break field,
            Some(_) => continue,
            None => return Err(ApiError::BadRequest("No file uploaded".to_string())),
        }
    };

    let name = field.file_name().unwrap_or("upload").to_string();
    let id = Uuid::new_v4();
    let stored_name = format!("{id}{}", stored_extension(&name));

    let dir = state.upload_root().join(slug.as_str());
    tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;
    let path = dir.join(&stored_name);

    let size = match write_field(field, &path, limit).await {
        Ok(size) => size,
        Err(e) => {
            remove_quietly(&path).await;
            return Err(e);
        }
    };

    let record = FileRecord {
        id,
        room_id: slug,
        uploader_id: user_id(&headers).unwrap_or_default(),
        name,
        size,
        stored_name,
        created_at: OffsetDateTime::now_utc(),
    };

    if let Err(e) = state.store.insert_file(&record).await {
        remove_quietly(&path).await;
        return Err(e.into());
    }

    tracing::info!(room = %record.room_id, file_id = %record.id, size, "File uploaded");

    Ok((StatusCode::CREATED, Json(record.into())))
}

/// List the files of a room
pub async fn list_files(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> ApiResult<Json<Vec<FileResponse>>> {
    let slug = RoomSlug::parse(&room)?;
    let files = state.store.list_files(&slug).await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}

/// Delete a file. Allowed for its uploader and the room owner.
pub async fn delete_file(
    State(state): State<AppState>,
    Path((room, file_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let requestor = user_id(&headers)
        .ok_or_else(|| ApiError::BadRequest("Missing User ID header".to_string()))?;

    let slug = RoomSlug::parse(&room)?;
    let file_id = Uuid::parse_str(&file_id).map_err(|_| ApiError::FileNotFound)?;

    let file = state
        .store
        .get_file(&slug, file_id)
        .await?
        .ok_or(ApiError::FileNotFound)?;

    let is_uploader = !file.uploader_id.is_empty() && file.uploader_id == requestor;
    let allowed = is_uploader
        || state
            .store
            .get_room(&slug)
            .await?
            .is_some_and(|room| room.owner == requestor);

    if !allowed {
        tracing::warn!(room = %slug, file_id = %file_id, "File deletion denied");
        return Err(ApiError::Forbidden);
    }

    state.store.delete_file(&slug, file_id).await?;
    remove_quietly(&state.upload_root().join(slug.as_str()).join(&file.stored_name)).await;

    tracing::info!(room = %slug, file_id = %file_id, "File deleted");

    Ok(Json(json!({ "message": "File deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_extension() {
        assert_eq!(stored_extension("notes.pdf"), ".pdf");
        assert_eq!(stored_extension("archive.tar.gz"), ".gz");
        assert_eq!(stored_extension("README"), "");
        assert_eq!(stored_extension("weird.p/df"), "");
        assert_eq!(stored_extension("evil.$(rm)"), "");
    }

    #[test]
    fn test_user_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_id(&headers), None);

        headers.insert(USER_ID_HEADER, "  ".parse().unwrap());
        assert_eq!(user_id(&headers), None);

        headers.insert(USER_ID_HEADER, "alice".parse().unwrap());
        assert_eq!(user_id(&headers), Some("alice".to_string()));
    }

    #[test]
    fn test_file_response_includes_url() {
        let record = FileRecord {
            id: Uuid::new_v4(),
            room_id: RoomSlug::parse("ab-12").unwrap(),
            uploader_id: String::new(),
            name: "a.txt".to_string(),
            size: 1,
            stored_name: "x.txt".to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(FileResponse::from(record)).unwrap();
        assert_eq!(json["url"], "/uploads/ab-12/x.txt");
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["roomId"], "ab-12");
    }
}
