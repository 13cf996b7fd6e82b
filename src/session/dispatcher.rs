use crate::common::{Identity, Message, MessageKind};
use crate::network::PeerTransport;

use super::codec::{self, WireMessage};
use super::history::History;
use super::registry::ConnectionRegistry;

/// Borrowed view of the session state needed to send one message.
pub struct OutboundDispatcher<'a, T: PeerTransport + ?Sized> {
    pub local: Option<&'a Identity>,
    pub registry: &'a ConnectionRegistry,
    pub transport: &'a mut T,
    pub history: &'a mut History,
}

impl<T: PeerTransport + ?Sized> OutboundDispatcher<'_, T> {
    /// Fans a message out to every channel of the current peer and echoes it
    /// into local history.
    ///
    /// Without a local identity or a current peer this is a no-op and
    /// returns `None`. Per-channel delivery failures are logged, never
    /// retried, and do not affect the local echo.
    pub fn send(&mut self, content: String, kind: MessageKind) -> Option<Message> {
        let Some(local) = self.local else {
            log::debug!("Ignoring send without a registered identity");
            return None;
        };
        let registry = self.registry;
        let Some(remote) = registry.current() else {
            log::debug!("Ignoring send without a connected peer");
            return None;
        };

        let message = Message::new(local.clone(), content, kind);
        match WireMessage::from(&message).to_bytes() {
            Ok(payload) => {
                for channel in registry.channels_for(remote) {
                    if let Err(err) = self.transport.send(channel, payload.clone()) {
                        log::warn!("Failed to deliver to {remote} over {channel}: {err}");
                    }
                }
            }
            Err(err) => {
                log::warn!("Failed to serialize message: {err}");
                return None;
            }
        }

        self.history.push(message.clone());
        Some(message)
    }
}

/// Decodes an inbound payload and appends it to history when valid.
pub fn receive(history: &mut History, payload: &[u8]) -> Option<Message> {
    let message = codec::decode(payload)?;
    history.push(message.clone());
    Some(message)
}
