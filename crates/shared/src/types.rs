//! Common types used across Notex

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::NotexError;

// =============================================================================
// Room identifiers
// =============================================================================

/// Validated room identifier.
///
/// Every room is addressed by its slug: in HTTP paths, in the WebSocket admission
/// route, in the store keys and as the upload sub-directory. The accepted alphabet
/// (`[A-Za-z0-9_-]`, at most [`RoomSlug::MAX_LEN`] chars) keeps it a safe single
/// path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomSlug(String);

impl RoomSlug {
    pub const MAX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self, NotexError> {
        if raw.is_empty() {
            return Err(NotexError::InvalidRoomId("room ID is required"));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(NotexError::InvalidRoomId("room ID too long (max 64 characters)"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(NotexError::InvalidRoomId(
                "room ID may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoomSlug {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomSlug {
    type Err = NotexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomSlug {
    type Error = NotexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomSlug> for String {
    fn from(slug: RoomSlug) -> Self {
        slug.0
    }
}

// =============================================================================
// Rooms
// =============================================================================

/// Room metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub slug: RoomSlug,
    pub owner: String,
    /// Last saved document content, opaque to the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
}

impl Room {
    pub fn new(slug: RoomSlug, owner: impl Into<String>, expire_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            slug,
            owner: owner.into(),
            content: None,
            created_at: OffsetDateTime::now_utc(),
            expire_at,
        }
    }

    /// Whether the room holds saved content. Rooms with content live longer.
    pub fn has_content(&self) -> bool {
        match &self.content {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expire_at <= now
    }
}

// =============================================================================
// Files
// =============================================================================

/// Metadata of a file uploaded into a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub room_id: RoomSlug,
    /// Value of the uploader's `X-User-ID` header, empty when absent
    #[serde(default)]
    pub uploader_id: String,
    /// Original file name as sent by the client
    pub name: String,
    pub size: u64,
    /// Name on disk inside the room's upload directory
    pub stored_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl FileRecord {
    /// Public URL under the static `/uploads` mount
    pub fn public_url(&self) -> String {
        format!("/uploads/{}/{}", self.room_id, self.stored_name)
    }
}
