//! Notex Shared Types and Utilities
//!
//! This crate contains the room and file models, identifier validation, and slug
//! generation shared by the Notex server crates.

pub mod error;
pub mod slug;
pub mod types;

pub use error::*;
pub use slug::{generate_slug, validate_custom_slug};
pub use types::*;
