//! Relay message types
//!
//! The relay never decodes collaboration payloads. It only looks at the first byte
//! to tell presence (awareness) updates, which are cached for late joiners, from
//! document content, which is only broadcast.

use std::sync::Arc;

/// Leading byte marking a presence/awareness payload
pub const PRESENCE_DISCRIMINATOR: u8 = 1;

/// An immutable payload shared by every recipient queue it is fanned out to
pub type Payload = Arc<[u8]>;

/// Classification of a published payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Participant state (cursor, identity); cached and broadcast
    Presence,
    /// Document content; broadcast only
    Content,
}

impl MessageKind {
    pub fn classify(payload: &[u8]) -> Self {
        match payload.first() {
            Some(&PRESENCE_DISCRIMINATOR) => MessageKind::Presence,
            _ => MessageKind::Content,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Presence => "presence",
            MessageKind::Content => "content",
        }
    }
}
