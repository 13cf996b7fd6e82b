use super::types::{Identity, Message};

/// Events the session loop emits for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Confirmed local identity, or `None` after logout.
    IdentityChanged(Option<Identity>),
    /// The name is already taken on the network.
    RegistrationFailed(Identity),
    ConnectionChanged(Option<Identity>),
    MessageAppended(Message),
    /// Upload percentage; `None` clears the indicator.
    UploadProgress(Option<u8>),
    UploadFailed(String),
    HistoryCleared,
}
