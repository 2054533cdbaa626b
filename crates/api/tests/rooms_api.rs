//! HTTP API tests against the in-memory room store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use notex_api::{
    config::{LogFormat, StoreBackend},
    routes::create_router,
    store::{MemoryRoomStore, RoomDirectory, RoomStore, StoreError, StoreResult},
    websocket::{Endpoint, EndpointState},
    AppState, Config,
};
use notex_shared::{FileRecord, Room, RoomSlug};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "notex-test-boundary";

fn test_config(upload_dir: &Path) -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        client_origin: "http://localhost:5173".to_string(),
        log_format: LogFormat::Pretty,
        room_store: StoreBackend::Memory,
        redis_url: "redis://localhost:6379".to_string(),
        room_ttl_empty_secs: 86400,
        room_ttl_content_secs: 604800,
        room_check_timeout_ms: 1000,
        room_sweep_interval_secs: 0,
        upload_dir: upload_dir.to_string_lossy().into_owned(),
        max_upload_bytes: 1024,
        admission_ticket_ttl_secs: 30,
        ws_queue_capacity: 16,
        ws_max_message_bytes: 1024 * 1024,
        ws_ping_interval_secs: 54,
        ws_idle_timeout_secs: 60,
    }
}

struct TestApp {
    state: AppState,
    router: Router,
    upload_dir: PathBuf,
}

/// Memory store whose bulk file-record deletion always fails
struct FileCleanupFailingStore(MemoryRoomStore);

#[async_trait]
impl RoomDirectory for FileCleanupFailingStore {
    async fn room_exists(&self, room: &RoomSlug) -> StoreResult<bool> {
        self.0.room_exists(room).await
    }
}

#[async_trait]
impl RoomStore for FileCleanupFailingStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.0.ping().await
    }

    async fn insert_room(&self, room: &Room) -> StoreResult<bool> {
        self.0.insert_room(room).await
    }

    async fn get_room(&self, room: &RoomSlug) -> StoreResult<Option<Room>> {
        self.0.get_room(room).await
    }

    async fn touch_room(&self, room: &RoomSlug, expire_at: OffsetDateTime) -> StoreResult<bool> {
        self.0.touch_room(room, expire_at).await
    }

    async fn save_content(
        &self,
        room: &RoomSlug,
        content: Value,
        owner: &str,
        expire_at: OffsetDateTime,
    ) -> StoreResult<Room> {
        self.0.save_content(room, content, owner, expire_at).await
    }

    async fn delete_room(&self, room: &RoomSlug) -> StoreResult<bool> {
        self.0.delete_room(room).await
    }

    async fn insert_file(&self, file: &FileRecord) -> StoreResult<()> {
        self.0.insert_file(file).await
    }

    async fn list_files(&self, room: &RoomSlug) -> StoreResult<Vec<FileRecord>> {
        self.0.list_files(room).await
    }

    async fn get_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<Option<FileRecord>> {
        self.0.get_file(room, file_id).await
    }

    async fn delete_file(&self, room: &RoomSlug, file_id: Uuid) -> StoreResult<bool> {
        self.0.delete_file(room, file_id).await
    }

    async fn delete_files(&self, room: &RoomSlug) -> StoreResult<usize> {
        Err(StoreError::RoomNotFound(room.clone()))
    }
}

impl TestApp {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryRoomStore::new()))
    }

    fn with_store(store: Arc<dyn RoomStore>) -> Self {
        let upload_dir = std::env::temp_dir().join(format!("notex-test-{}", Uuid::new_v4()));
        let state = AppState::new(test_config(&upload_dir), store);
        let router = create_router(state.clone());
        Self {
            state,
            router,
            upload_dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn json(&self, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    async fn delete(&self, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::DELETE).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-ID", user);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn upload(&self, room: &str, user: &str, name: &str, content: &[u8]) -> (StatusCode, Value) {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n").as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/upload/{room}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header("X-User-ID", user)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "notex-backend");
    assert_eq!(body["store"], "healthy");
    assert_eq!(body["rooms"], 0);

    assert_eq!(app.get("/health/live").await.0, StatusCode::OK);
    assert_eq!(app.get("/health/ready").await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_create_room_with_custom_slug() {
    let app = TestApp::new();

    let (status, body) = app
        .json(Method::POST, "/api/rooms", json!({"slug": "my-project", "owner": "alice"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["slug"], "my-project");
    assert_eq!(body["owner"], "alice");

    let (status, body) = app
        .json(Method::POST, "/api/rooms", json!({"slug": "my-project"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = app
        .json(Method::POST, "/api/rooms", json!({"slug": "a-b"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "each word must be at least 2 characters");
}

#[tokio::test]
async fn test_create_room_generated_and_prefixed() {
    let app = TestApp::new();

    let (status, body) = app.json(Method::POST, "/api/rooms", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    let slug = body["slug"].as_str().unwrap();
    assert_eq!(slug.split('-').count(), 2, "generated slug {slug}");

    let (status, body) = app
        .json(Method::POST, "/api/rooms", json!({"slugPrefix": "team"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let slug = body["slug"].as_str().unwrap();
    assert!(slug.starts_with("team-"));
    assert_eq!(slug.len(), "team-".len() + 8);

    let (status, _) = app
        .json(Method::POST, "/api/rooms", json!({"slugPrefix": "bad/prefix"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_and_save_room() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/rooms/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "ROOM_NOT_FOUND");

    let (status, _) = app
        .json(Method::POST, "/api/rooms/demo-room/save", json!({"content": "AAEC"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/rooms/demo-room").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"], "anon_save");
    assert_eq!(body["content"], "AAEC");
}

#[tokio::test]
async fn test_delete_room_closes_connections() {
    let app = TestApp::new();
    app.json(Method::POST, "/api/rooms", json!({"slug": "ab-12"}))
        .await;

    let room = RoomSlug::parse("ab-12").unwrap();
    let hub = &app.state.hub;
    let (endpoint, mailbox) = Endpoint::open(room.clone(), 8);
    let _registration = hub.register(endpoint, hub.admission_ticket(&room)).unwrap();
    assert_eq!(hub.member_count(&room), 1);

    let (status, body) = app.delete("/api/rooms/ab-12", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Room deleted");

    assert_eq!(hub.room_count(), 0);
    assert_eq!(mailbox.state(), EndpointState::Draining);
    assert_eq!(app.get("/api/rooms/ab-12").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_room_closes_connections_when_file_cleanup_fails() {
    let app = TestApp::with_store(Arc::new(FileCleanupFailingStore(MemoryRoomStore::new())));
    app.json(Method::POST, "/api/rooms", json!({"slug": "ab-12"}))
        .await;

    let room = RoomSlug::parse("ab-12").unwrap();
    let hub = &app.state.hub;
    let (endpoint, mailbox) = Endpoint::open(room.clone(), 8);
    let _registration = hub.register(endpoint, hub.admission_ticket(&room)).unwrap();

    let (status, _) = app.delete("/api/rooms/ab-12", None).await;
    assert_eq!(status, StatusCode::OK);

    assert!(!app.state.store.room_exists(&room).await.unwrap());
    assert_eq!(hub.member_count(&room), 0);
    assert_eq!(mailbox.state(), EndpointState::Draining);
}

#[tokio::test]
async fn test_file_upload_list_and_delete() {
    let app = TestApp::new();
    app.json(Method::POST, "/api/rooms", json!({"slug": "ab-12", "owner": "owner"}))
        .await;

    let (status, body) = app.upload("ab-12", "alice", "notes.txt", b"hello").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "notes.txt");
    assert_eq!(body["size"], 5);
    assert_eq!(body["uploaderId"], "alice");
    let file_id = body["id"].as_str().unwrap().to_string();
    let url = body["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/uploads/ab-12/") && url.ends_with(".txt"));

    let stored = app
        .upload_dir
        .join("ab-12")
        .join(body["storedName"].as_str().unwrap());
    assert_eq!(std::fs::read(&stored).unwrap(), b"hello");

    let (status, body) = app.get("/api/rooms/ab-12/files").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["url"], url.as_str());

    let file_uri = format!("/api/rooms/ab-12/files/{file_id}");
    assert_eq!(app.delete(&file_uri, None).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(app.delete(&file_uri, Some("mallory")).await.0, StatusCode::FORBIDDEN);
    assert_eq!(app.delete(&file_uri, Some("alice")).await.0, StatusCode::OK);
    assert_eq!(app.delete(&file_uri, Some("alice")).await.0, StatusCode::NOT_FOUND);
    assert!(!stored.exists());
}

#[tokio::test]
async fn test_room_owner_may_delete_any_file() {
    let app = TestApp::new();
    app.json(Method::POST, "/api/rooms", json!({"slug": "ab-12", "owner": "owner"}))
        .await;

    let (_, body) = app.upload("ab-12", "alice", "a.bin", b"data").await;
    let file_uri = format!("/api/rooms/ab-12/files/{}", body["id"].as_str().unwrap());

    assert_eq!(app.delete(&file_uri, Some("owner")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_upload_rejections() {
    let app = TestApp::new();

    let (status, _) = app.upload("nowhere", "alice", "a.txt", b"x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.json(Method::POST, "/api/rooms", json!({"slug": "ab-12"}))
        .await;
    let (status, body) = app.upload("ab-12", "alice", "big.bin", &[7u8; 2048]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("File exceeds"));

    let (_, body) = app.get("/api/rooms/ab-12/files").await;
    assert!(body.as_array().unwrap().is_empty());
}
