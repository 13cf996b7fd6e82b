use crate::common::Identity;
use crate::network::PeerTransport;

use super::error::SessionError;

/// Local side of claiming a username on the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Registration {
    #[default]
    Unregistered,
    Pending(Identity),
    Confirmed(Identity),
}

impl Registration {
    /// Validates `name` and asks the transport to claim it.
    ///
    /// Collisions are not detected here; the transport answers later with
    /// `IdentityUnavailable`.
    pub fn begin<T: PeerTransport + ?Sized>(
        transport: &mut T,
        name: &str,
    ) -> Result<Self, SessionError> {
        let identity = Identity::new(name)?;
        transport.open(&identity)?;
        log::info!("Registering identity {identity}");
        Ok(Registration::Pending(identity))
    }

    /// Moves a pending claim to confirmed. Stale confirmations are ignored.
    pub fn confirm(&mut self, identity: &Identity) -> bool {
        match self {
            Registration::Pending(pending) if pending == identity => {
                *self = Registration::Confirmed(identity.clone());
                true
            }
            _ => false,
        }
    }

    /// Drops a pending claim the network refused.
    pub fn reject(&mut self, identity: &Identity) -> bool {
        match self {
            Registration::Pending(pending) if pending == identity => {
                *self = Registration::Unregistered;
                true
            }
            _ => false,
        }
    }

    pub fn confirmed(&self) -> Option<&Identity> {
        match self {
            Registration::Confirmed(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<&Identity> {
        match self {
            Registration::Pending(identity) => Some(identity),
            _ => None,
        }
    }
}
