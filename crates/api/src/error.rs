//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use notex_shared::NotexError;
use serde_json::json;

use crate::store::StoreError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Insufficient permissions")]
    Forbidden,

    // Resource errors
    #[error("Room not found")]
    RoomNotFound,
    #[error("File not found")]
    FileNotFound,
    #[error("Resource already exists")]
    Conflict(String),

    // Internal errors
    #[error("Room store error: {0}")]
    Store(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Resources
            ApiError::RoomNotFound => (StatusCode::NOT_FOUND, "ROOM_NOT_FOUND", self.to_string()),
            ApiError::FileNotFound => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Internal
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", "Room store error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Room store error");
        match err {
            StoreError::RoomNotFound(_) => ApiError::RoomNotFound,
            _ => ApiError::Store(err.to_string()),
        }
    }
}

impl From<NotexError> for ApiError {
    fn from(err: NotexError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::RoomNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "ROOM_NOT_FOUND");
        assert_eq!(body["error"]["message"], "Room not found");
    }

    #[tokio::test]
    async fn test_store_error_hides_details() {
        let response = ApiError::Store("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Room store error");
    }

    #[test]
    fn test_conversions() {
        let slug = notex_shared::RoomSlug::parse("ab-12").unwrap();
        assert!(matches!(
            ApiError::from(StoreError::RoomNotFound(slug)),
            ApiError::RoomNotFound
        ));
        assert!(matches!(
            ApiError::from(NotexError::InvalidSlug("slug cannot be empty")),
            ApiError::Validation(msg) if msg == "slug cannot be empty"
        ));
    }
}
