//! Neutral outbound message representation.
//!
//! An [`OutgoingMessage`] is addressed to exactly one [`PeerId`]. Messages that
//! carry an attachment, a forwarded-message reference or a sticker are
//! *special*: the queue never coalesces them with other messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque destination identifier of a conversation or user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(i64);

impl PeerId {
    /// Wrap a raw platform peer identifier.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw platform identifier.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for PeerId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound message request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Destination conversation.
    pub peer: PeerId,
    /// Message body. May be empty for attachment-only messages.
    #[serde(default)]
    pub text: String,
    /// Attachment descriptors, e.g. `doc123_456`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// Identifiers of forwarded messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forward_messages: Vec<i64>,
    /// Sticker to send instead of text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_id: Option<u64>,
}

impl OutgoingMessage {
    /// A plain text message.
    pub fn text(peer: PeerId, text: impl Into<String>) -> Self {
        Self {
            peer,
            text: text.into(),
            attachments: Vec::new(),
            forward_messages: Vec::new(),
            sticker_id: None,
        }
    }

    /// A sticker message.
    pub fn sticker(peer: PeerId, sticker_id: u64) -> Self {
        Self {
            sticker_id: Some(sticker_id),
            ..Self::text(peer, "")
        }
    }

    /// Add an attachment descriptor.
    #[must_use]
    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachments.push(attachment.into());
        self
    }

    /// Forward an existing message along with this one.
    #[must_use]
    pub fn with_forward(mut self, message_id: i64) -> Self {
        self.forward_messages.push(message_id);
        self
    }

    /// Whether the message carries an attachment, forward or sticker.
    pub fn is_special(&self) -> bool {
        !self.attachments.is_empty() || !self.forward_messages.is_empty() || self.sticker_id.is_some()
    }

    /// Append another message body after a blank line.
    pub(crate) fn append_text(&mut self, text: &str) {
        self.text.push_str("\n\n");
        self.text.push_str(text);
    }
}
