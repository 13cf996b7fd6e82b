use tokio::sync::mpsc;

use crate::common::{ChannelId, Identity};
use crate::session::error::TransportError;

/// Sender half of the session's transport event queue.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Asynchronous notifications a transport pushes into the session queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    IdentityConfirmed(Identity),
    IdentityUnavailable(Identity),
    /// A remote peer opened a channel to us.
    InboundChannel { remote: Identity, channel: ChannelId },
    /// A channel we asked for via `connect_to` is ready.
    ChannelOpened { remote: Identity, channel: ChannelId },
    ChannelData { channel: ChannelId, payload: Vec<u8> },
    ChannelClosed { channel: ChannelId },
}

/// Capabilities the session needs from the underlying peer network.
///
/// Every call returns immediately. Outcomes that depend on the network
/// arrive later as [`TransportEvent`]s on the queue the transport was
/// built with.
pub trait PeerTransport: Send + Sync {
    /// Claims `identity`; answered by `IdentityConfirmed` or `IdentityUnavailable`.
    fn open(&mut self, identity: &Identity) -> Result<(), TransportError>;

    /// Starts opening a channel to `remote`; answered by `ChannelOpened`.
    fn connect_to(&mut self, remote: &Identity) -> Result<ChannelId, TransportError>;

    /// Sends an opaque payload over an open channel.
    fn send(&mut self, channel: ChannelId, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Releases the identity and every channel.
    fn close(&mut self);
}
