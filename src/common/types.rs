use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::error::SessionError;

/// Username claimed on the peer network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Trims the input; an identity is never empty.
    pub fn new(name: impl AsRef<str>) -> Result<Self, SessionError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(SessionError::InvalidIdentity);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Kind of payload carried in `Message::content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
        }
    }

    /// Image for `image/*` content types, video for everything else.
    pub fn for_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            MessageKind::Image
        } else {
            MessageKind::Video
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "video" => Some(MessageKind::Video),
            _ => None,
        }
    }
}

/// Chat message as held in history and sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Identity,
    pub kind: MessageKind,
    /// Literal text, or a data URL for image/video.
    pub content: String,
}

impl Message {
    pub fn new(sender: Identity, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            sender,
            kind,
            content: content.into(),
        }
    }
}

/// Opaque handle for one data path to a remote identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
