use chrono::{DateTime, Utc};

use crate::common::{Identity, Message, SessionEvent};

const MAX_DEBUG_EVENTS: usize = 100;

/// Debug event shown in the side panel
#[derive(Debug, Clone)]
pub struct DebugEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: &'static str,
    pub message: String,
}

/// What the UI currently shows. Updated only from session events.
#[derive(Default)]
pub struct AppState {
    pub identity: Option<Identity>,
    /// Name submitted on the login form and not yet confirmed.
    pub pending_name: Option<String>,
    pub connection: Option<Identity>,
    pub messages: Vec<Message>,
    pub upload_progress: Option<u8>,
    pub notice: Option<String>,
    pub login_input: String,
    pub input_text: String,
    pub connect_input: String,
    pub debug_events: Vec<DebugEvent>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_logged_in(&self) -> bool {
        self.identity.is_some() || self.pending_name.is_some()
    }

    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::IdentityChanged(Some(identity)) => {
                self.add_debug_event("REGISTERED", format!("Registered as {identity}"));
                self.pending_name = None;
                self.notice = None;
                self.identity = Some(identity);
            }
            SessionEvent::IdentityChanged(None) => {
                self.add_debug_event("LOGGED_OUT", "Identity released".to_string());
                self.identity = None;
                self.pending_name = None;
            }
            SessionEvent::RegistrationFailed(identity) => {
                self.add_debug_event("NAME_TAKEN", format!("{identity} is already in use"));
                self.pending_name = None;
                self.notice = Some(format!("Username `{identity}` is already taken"));
            }
            SessionEvent::ConnectionChanged(connection) => {
                match &connection {
                    Some(peer) => self.add_debug_event("PEER_CONNECTED", format!("Connected to {peer}")),
                    None => self.add_debug_event("PEER_CLEARED", "No peer connected".to_string()),
                }
                self.connection = connection;
            }
            SessionEvent::MessageAppended(message) => {
                self.add_debug_event(
                    "MESSAGE",
                    format!("{} message from {}", message.kind.as_str(), message.sender),
                );
                self.messages.push(message);
            }
            SessionEvent::UploadProgress(progress) => self.upload_progress = progress,
            SessionEvent::UploadFailed(reason) => {
                self.add_debug_event("UPLOAD_FAILED", reason.clone());
                self.notice = Some(format!("Upload failed: {reason}"));
            }
            SessionEvent::HistoryCleared => self.messages.clear(),
        }
    }

    pub fn add_debug_event(&mut self, event_type: &'static str, message: String) {
        self.debug_events.push(DebugEvent {
            timestamp: Utc::now(),
            event_type,
            message,
        });

        if self.debug_events.len() > MAX_DEBUG_EVENTS {
            self.debug_events.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MessageKind;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[test]
    fn failed_registration_returns_to_login() {
        let mut state = AppState::new();
        state.pending_name = Some("alice".into());
        assert!(state.is_logged_in());

        state.apply(SessionEvent::RegistrationFailed(id("alice")));
        assert!(!state.is_logged_in());
        assert!(state.notice.is_some());
    }

    #[test]
    fn history_cleared_empties_messages() {
        let mut state = AppState::new();
        state.apply(SessionEvent::MessageAppended(Message::new(
            id("bob"),
            "hi",
            MessageKind::Text,
        )));
        assert_eq!(state.messages.len(), 1);

        state.apply(SessionEvent::HistoryCleared);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn debug_log_is_bounded() {
        let mut state = AppState::new();
        for i in 0..150 {
            state.add_debug_event("TEST", i.to_string());
        }
        assert_eq!(state.debug_events.len(), MAX_DEBUG_EVENTS);
        assert_eq!(state.debug_events[0].message, "50");
    }
}
