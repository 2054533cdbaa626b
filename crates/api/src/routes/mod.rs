//! API routes

pub mod files;
pub mod health;
pub mod rooms;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{state::AppState, websocket::ws_handler};

/// Header carrying the caller's user id for file ownership checks
pub const USER_ID_HEADER: &str = "x-user-id";

/// Room of headroom on top of the upload limit for multipart framing
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

fn cors_layer(client_origin: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(client_origin) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(e) => {
            tracing::warn!(origin = %client_origin, error = %e, "Invalid CLIENT_ORIGIN, CORS disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(12 * 60 * 60))
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let upload_limit = state
        .config
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let api_routes = Router::new()
        .route("/rooms", post(rooms::create_room))
        .route("/rooms/:room", get(rooms::get_room).delete(rooms::delete_room))
        .route("/rooms/:room/save", post(rooms::save_room))
        .route("/rooms/:room/files", get(files::list_files))
        .route("/rooms/:room/files/:file_id", delete(files::delete_file))
        .route(
            "/upload/:room",
            post(files::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        );

    let websocket_routes = Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/:room", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api", api_routes)
        .nest_service("/uploads", ServeDir::new(state.upload_root()))
        .layer(cors_layer(&state.config.client_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
