//! Error types for Notex

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotexError {
    /// A user-chosen slug failed validation; the message is user-facing.
    #[error("{0}")]
    InvalidSlug(&'static str),

    #[error("Invalid room ID: {0}")]
    InvalidRoomId(&'static str),
}
