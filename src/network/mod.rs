pub mod behavior;
pub mod client;
pub mod memory;
pub mod peer;
pub mod transport;

pub use client::Libp2pTransport;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use peer::{PeerTransport, TransportEvent, TransportEventSender};
