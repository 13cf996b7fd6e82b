//! Peer session manager: identity, connection registry, message codec,
//! outbound fan-out, media encoding and the controller that drives them.

pub mod codec;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod identity;
pub mod media;
pub mod registry;

pub use controller::{Session, SessionState};
pub use error::{MediaError, SessionError, TransportError};
pub use history::History;
pub use media::{EncodeEvent, EncodedMedia, MediaFile};
pub use registry::ConnectionRegistry;
