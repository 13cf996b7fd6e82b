//! In-process peer network.
//!
//! Every [`MemoryTransport`] created from the same [`MemoryNetwork`] can see
//! the others. Used by the test-suite and by `--local` mode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::{ChannelId, Identity};
use crate::session::error::TransportError;

use super::peer::{PeerTransport, TransportEvent, TransportEventSender};

type EndpointId = usize;

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Default)]
struct Hub {
    next_endpoint: EndpointId,
    endpoints: HashMap<EndpointId, Endpoint>,
    identities: HashMap<Identity, EndpointId>,
    channels: HashMap<ChannelId, ChannelEnd>,
}

struct Endpoint {
    identity: Option<Identity>,
    events: TransportEventSender,
}

struct ChannelEnd {
    owner: EndpointId,
    peer: ChannelId,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new endpoint that reports into `events`.
    pub fn transport(&self, events: TransportEventSender) -> MemoryTransport {
        let mut hub = self.lock();
        let endpoint = hub.next_endpoint;
        hub.next_endpoint += 1;
        hub.endpoints.insert(
            endpoint,
            Endpoint {
                identity: None,
                events,
            },
        );
        MemoryTransport {
            network: self.clone(),
            endpoint,
        }
    }

    /// Number of open channel ends, both directions counted.
    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Hub {
    fn emit(&self, endpoint: EndpointId, event: TransportEvent) -> bool {
        match self.endpoints.get(&endpoint) {
            Some(target) => target.events.send(event).is_ok(),
            None => false,
        }
    }

    fn release(&mut self, endpoint: EndpointId) {
        if let Some(identity) = self
            .endpoints
            .get_mut(&endpoint)
            .and_then(|entry| entry.identity.take())
        {
            self.identities.remove(&identity);
        }

        let owned: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, end)| end.owner == endpoint)
            .map(|(channel, _)| *channel)
            .collect();

        for channel in owned {
            let Some(end) = self.channels.remove(&channel) else {
                continue;
            };
            if let Some(peer_end) = self.channels.remove(&end.peer) {
                self.emit(peer_end.owner, TransportEvent::ChannelClosed { channel: end.peer });
            }
        }
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: EndpointId,
}

impl PeerTransport for MemoryTransport {
    fn open(&mut self, identity: &Identity) -> Result<(), TransportError> {
        let mut hub = self.network.lock();

        if let Some(owner) = hub.identities.get(identity) {
            if *owner != self.endpoint {
                log::debug!("Identity {identity} already claimed on memory network");
                hub.emit(
                    self.endpoint,
                    TransportEvent::IdentityUnavailable(identity.clone()),
                );
                return Ok(());
            }
        }

        let previous = hub
            .endpoints
            .get_mut(&self.endpoint)
            .ok_or(TransportError::Shutdown)?
            .identity
            .replace(identity.clone());
        if let Some(previous) = previous {
            hub.identities.remove(&previous);
        }
        hub.identities.insert(identity.clone(), self.endpoint);
        hub.emit(
            self.endpoint,
            TransportEvent::IdentityConfirmed(identity.clone()),
        );
        Ok(())
    }

    fn connect_to(&mut self, remote: &Identity) -> Result<ChannelId, TransportError> {
        let mut hub = self.network.lock();
        let local = hub
            .endpoints
            .get(&self.endpoint)
            .and_then(|entry| entry.identity.clone())
            .ok_or(TransportError::NotRegistered)?;

        let channel = ChannelId::new();
        let Some(remote_endpoint) = hub.identities.get(remote).copied() else {
            // Nobody answers; the attempt never resolves.
            log::debug!("No endpoint registered as {remote}");
            return Ok(channel);
        };

        let remote_channel = ChannelId::new();
        hub.channels.insert(
            channel,
            ChannelEnd {
                owner: self.endpoint,
                peer: remote_channel,
            },
        );
        hub.channels.insert(
            remote_channel,
            ChannelEnd {
                owner: remote_endpoint,
                peer: channel,
            },
        );

        hub.emit(
            remote_endpoint,
            TransportEvent::InboundChannel {
                remote: local,
                channel: remote_channel,
            },
        );
        hub.emit(
            self.endpoint,
            TransportEvent::ChannelOpened {
                remote: remote.clone(),
                channel,
            },
        );
        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: Vec<u8>) -> Result<(), TransportError> {
        let hub = self.network.lock();
        let end = hub
            .channels
            .get(&channel)
            .filter(|end| end.owner == self.endpoint)
            .ok_or_else(|| TransportError::UnknownChannel(channel.to_string()))?;
        let peer_end = hub
            .channels
            .get(&end.peer)
            .ok_or_else(|| TransportError::ChannelClosed(channel.to_string()))?;

        let delivered = hub.emit(
            peer_end.owner,
            TransportEvent::ChannelData {
                channel: end.peer,
                payload,
            },
        );
        if delivered {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed(channel.to_string()))
        }
    }

    fn close(&mut self) {
        self.network.lock().release(self.endpoint);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut hub = self.network.lock();
        hub.release(self.endpoint);
        hub.endpoints.remove(&self.endpoint);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn identity(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[test]
    fn second_claim_of_a_name_is_rejected() {
        let network = MemoryNetwork::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        let mut alice = network.transport(alice_tx);
        let mut other = network.transport(other_tx);

        alice.open(&identity("alice")).unwrap();
        other.open(&identity("alice")).unwrap();

        assert_eq!(
            alice_rx.try_recv().unwrap(),
            TransportEvent::IdentityConfirmed(identity("alice"))
        );
        assert_eq!(
            other_rx.try_recv().unwrap(),
            TransportEvent::IdentityUnavailable(identity("alice"))
        );
    }

    #[test]
    fn connect_opens_linked_channels_and_routes_data() {
        let network = MemoryNetwork::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let mut alice = network.transport(alice_tx);
        let mut bob = network.transport(bob_tx);
        alice.open(&identity("alice")).unwrap();
        bob.open(&identity("bob")).unwrap();
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();

        let bob_side = bob.connect_to(&identity("alice")).unwrap();
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            TransportEvent::ChannelOpened {
                remote: identity("alice"),
                channel: bob_side
            }
        );
        let TransportEvent::InboundChannel { remote, channel } = alice_rx.try_recv().unwrap()
        else {
            panic!("expected inbound channel");
        };
        assert_eq!(remote, identity("bob"));

        alice.send(channel, b"ping".to_vec()).unwrap();
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            TransportEvent::ChannelData {
                channel: bob_side,
                payload: b"ping".to_vec()
            }
        );
        assert_eq!(network.open_channels(), 2);
    }

    #[test]
    fn connect_to_unknown_identity_never_opens() {
        let network = MemoryNetwork::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut alice = network.transport(tx);
        alice.open(&identity("alice")).unwrap();
        rx.try_recv().unwrap();

        alice.connect_to(&identity("nobody")).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connect_requires_registration() {
        let network = MemoryNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut alice = network.transport(tx);
        assert_eq!(
            alice.connect_to(&identity("bob")),
            Err(TransportError::NotRegistered)
        );
    }

    #[test]
    fn close_releases_name_and_notifies_peer() {
        let network = MemoryNetwork::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let mut alice = network.transport(alice_tx);
        let mut bob = network.transport(bob_tx);
        alice.open(&identity("alice")).unwrap();
        bob.open(&identity("bob")).unwrap();
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();

        let bob_side = bob.connect_to(&identity("alice")).unwrap();
        bob_rx.try_recv().unwrap();
        alice_rx.try_recv().unwrap();

        alice.close();
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            TransportEvent::ChannelClosed { channel: bob_side }
        );
        assert_eq!(network.open_channels(), 0);

        let (carol_tx, mut carol_rx) = mpsc::unbounded_channel();
        let mut carol = network.transport(carol_tx);
        carol.open(&identity("alice")).unwrap();
        assert_eq!(
            carol_rx.try_recv().unwrap(),
            TransportEvent::IdentityConfirmed(identity("alice"))
        );
    }
}
