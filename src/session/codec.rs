//! Wire shape of chat messages.
//!
//! ```json
//! { "sender": "alice", "type": "text", "content": "hi" }
//! ```

use serde::{Deserialize, Serialize};

use crate::common::{Identity, Message, MessageKind};

/// Outbound wire form of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
}

impl WireMessage {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        encode(&message.sender, &message.content, message.kind)
    }
}

/// Builds the wire form. No validation beyond the types themselves.
pub fn encode(sender: &Identity, content: &str, kind: MessageKind) -> WireMessage {
    WireMessage {
        sender: sender.to_string(),
        kind,
        content: content.to_string(),
    }
}

/// Inbound shape, lenient so that unknown kinds can be told apart from
/// broken JSON.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    sender: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Accepts a payload only when it names a known kind and a sender.
pub fn decode(raw: &[u8]) -> Option<Message> {
    let raw: RawMessage = match serde_json::from_slice(raw) {
        Ok(raw) => raw,
        Err(err) => {
            log::debug!("Dropping undecodable payload: {err}");
            return None;
        }
    };

    let Some(kind) = raw.kind.as_deref().and_then(MessageKind::parse) else {
        log::debug!("Dropping payload with unrecognized type {:?}", raw.kind);
        return None;
    };
    let Some(sender) = raw.sender.and_then(|sender| Identity::new(sender).ok()) else {
        log::debug!("Dropping {} payload without sender", kind.as_str());
        return None;
    };

    Some(Message::new(sender, raw.content.unwrap_or_default(), kind))
}
