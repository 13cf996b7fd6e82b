//! libp2p binding of [`PeerTransport`].
//!
//! Usernames are Kademlia records pointing at the PeerId that claimed them.
//! Channels are logical: each one is a [`ChannelId`] agreed through an
//! `Open` request, after which `Data` requests carry payloads.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use libp2p::kad;
use libp2p::request_response;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identify};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::common::{ChannelId, Identity};
use crate::session::error::TransportError;

use super::behavior::{
    Ack, ChatBehavior, ChatBehaviorEvent, Envelope, IDENTITY_REPUBLISH, build_behavior,
    identity_key, identity_record,
};
use super::peer::{PeerTransport, TransportEvent, TransportEventSender};
use super::transport::{build_transport, load_or_generate_local_key};

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Where and how the libp2p node starts.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub listen_addr: Multiaddr,
    pub bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    /// Keeps the PeerId stable so a restarted client still owns its name.
    pub key_path: PathBuf,
}

#[derive(Debug)]
enum NetworkCommand {
    Open(Identity),
    Connect { remote: Identity, channel: ChannelId },
    Send { channel: ChannelId, payload: Vec<u8> },
    Close,
}

/// Handle held by the session; the swarm runs on its own task.
pub struct Libp2pTransport {
    command_sender: mpsc::UnboundedSender<NetworkCommand>,
}

impl Libp2pTransport {
    /// Builds the swarm and spawns its event loop on the current runtime.
    pub fn spawn(
        settings: NetworkSettings,
        event_sender: TransportEventSender,
    ) -> Result<Self, Box<dyn Error>> {
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let client = P2PClient::new(settings, event_sender, command_receiver)?;
        tokio::spawn(async move {
            if let Err(err) = client.run().await {
                log::error!("Network client terminated: {err}");
            }
        });
        Ok(Self { command_sender })
    }

    fn submit(&self, command: NetworkCommand) -> Result<(), TransportError> {
        self.command_sender
            .send(command)
            .map_err(|_| TransportError::Shutdown)
    }
}

impl PeerTransport for Libp2pTransport {
    fn open(&mut self, identity: &Identity) -> Result<(), TransportError> {
        self.submit(NetworkCommand::Open(identity.clone()))
    }

    fn connect_to(&mut self, remote: &Identity) -> Result<ChannelId, TransportError> {
        let channel = ChannelId::new();
        self.submit(NetworkCommand::Connect {
            remote: remote.clone(),
            channel,
        })?;
        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.submit(NetworkCommand::Send { channel, payload })
    }

    fn close(&mut self) {
        let _ = self.submit(NetworkCommand::Close);
    }
}

#[derive(Debug)]
enum Registration {
    Lookup(Identity),
    Publish(Identity),
}

struct P2PClient {
    swarm: Swarm<ChatBehavior>,
    local_peer_id: PeerId,
    event_sender: TransportEventSender,
    command_receiver: mpsc::UnboundedReceiver<NetworkCommand>,
    local_identity: Option<Identity>,
    registrations: HashMap<kad::QueryId, Registration>,
    lookups: HashMap<kad::QueryId, (Identity, ChannelId)>,
    opening: HashMap<request_response::OutboundRequestId, (Identity, ChannelId, PeerId)>,
    channels: HashMap<ChannelId, PeerId>,
}

impl P2PClient {
    fn new(
        settings: NetworkSettings,
        event_sender: TransportEventSender,
        command_receiver: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<Self, Box<dyn Error>> {
        let local_key = load_or_generate_local_key(&settings.key_path)?;
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id}");

        let transport = build_transport(&local_key)?;
        let behavior = build_behavior(&local_key, local_peer_id)?;
        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor().with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT),
        );

        swarm.listen_on(settings.listen_addr)?;

        if settings.bootstrap_peers.is_empty() {
            log::warn!("No bootstrap peers configured; only peers that dial us can be reached");
        } else {
            for (peer_id, addr) in settings.bootstrap_peers {
                log::info!("Adding bootstrap peer {peer_id} at {addr}");
                swarm.behaviour_mut().kad.add_address(&peer_id, addr.clone());
                if let Err(err) = swarm.dial(addr) {
                    log::warn!("Failed to dial bootstrap peer {peer_id}: {err}");
                }
            }
            if let Err(err) = swarm.behaviour_mut().kad.bootstrap() {
                log::warn!("Failed to trigger Kademlia bootstrap: {err}");
            }
        }

        Ok(Self {
            swarm,
            local_peer_id,
            event_sender,
            command_receiver,
            local_identity: None,
            registrations: HashMap::new(),
            lookups: HashMap::new(),
            opening: HashMap::new(),
            channels: HashMap::new(),
        })
    }

    async fn run(mut self) -> Result<(), Box<dyn Error>> {
        log::info!("Network event loop started");
        let mut republish = time::interval(IDENTITY_REPUBLISH);
        republish.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
                _ = republish.tick() => self.republish_identity(),
            }
        }

        self.release_identity();
        Ok(())
    }

    fn emit(&self, event: TransportEvent) {
        if self.event_sender.send(event).is_err() {
            log::debug!("Session is gone; dropping transport event");
        }
    }

    fn handle_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::Open(identity) => {
                self.release_identity();
                let query = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .get_record(identity_key(&identity));
                self.registrations
                    .insert(query, Registration::Lookup(identity));
            }
            NetworkCommand::Connect { remote, channel } => {
                if self.local_identity.is_none() {
                    log::warn!("Connect to {remote} ignored: no identity registered");
                    return;
                }
                let query = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .get_record(identity_key(&remote));
                self.lookups.insert(query, (remote, channel));
            }
            NetworkCommand::Send { channel, payload } => {
                let Some(peer) = self.channels.get(&channel).copied() else {
                    log::debug!("Send on unknown channel {channel}");
                    return;
                };
                let Ok(payload) = String::from_utf8(payload) else {
                    log::warn!("Dropping non-UTF-8 payload for channel {channel}");
                    return;
                };
                self.swarm
                    .behaviour_mut()
                    .channels
                    .send_request(&peer, Envelope::Data { channel, payload });
            }
            NetworkCommand::Close => self.release_identity(),
        }
    }

    fn release_identity(&mut self) {
        for (channel, peer) in self.channels.drain() {
            self.swarm
                .behaviour_mut()
                .channels
                .send_request(&peer, Envelope::Close { channel });
        }
        self.lookups.clear();
        self.opening.clear();
        self.registrations.clear();
        if let Some(identity) = self.local_identity.take() {
            log::info!("Releasing identity {identity}");
            self.swarm
                .behaviour_mut()
                .kad
                .remove_record(&identity_key(&identity));
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<ChatBehaviorEvent>) {
        match event {
            SwarmEvent::Behaviour(ChatBehaviorEvent::Kad(event)) => self.handle_kad_event(event),
            SwarmEvent::Behaviour(ChatBehaviorEvent::Identify(event)) => {
                self.handle_identify_event(event)
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Channels(event)) => {
                self.handle_channel_event(event)
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address}/p2p/{}", self.local_peer_id);
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                log::debug!("Connection established with {peer_id}");
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                log::debug!("Connection closed with {peer_id}");
            }
            _ => {}
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        if let identify::Event::Received { peer_id, info, .. } = event {
            for addr in info.listen_addrs {
                self.swarm.behaviour_mut().kad.add_address(&peer_id, addr);
            }
        }
    }

    fn handle_kad_event(&mut self, event: kad::Event) {
        let kad::Event::OutboundQueryProgressed { id, result, .. } = event else {
            return;
        };

        match result {
            kad::QueryResult::Bootstrap(Ok(kad::BootstrapOk { num_remaining, .. })) => {
                log::debug!("Kademlia bootstrap ok, remaining peers: {num_remaining}");
            }
            kad::QueryResult::Bootstrap(Err(err)) => {
                log::warn!("Kademlia bootstrap error: {err:?}");
            }
            kad::QueryResult::GetRecord(result) => {
                // Both the no-record outcomes end the query.
                let owner = match result {
                    Ok(kad::GetRecordOk::FoundRecord(found)) => {
                        PeerId::from_bytes(&found.record.value).ok()
                    }
                    Ok(kad::GetRecordOk::FinishedWithNoAdditionalRecord { .. }) | Err(_) => None,
                };
                self.handle_record_lookup(id, owner);
            }
            kad::QueryResult::PutRecord(result) => {
                let Some(Registration::Publish(identity)) = self.registrations.remove(&id) else {
                    return;
                };
                if let Err(err) = result {
                    // The record is in our own store even when no peer took a copy.
                    log::warn!("Identity {identity} only stored locally: {err:?}");
                }
                log::info!("Registered identity {identity}");
                self.local_identity = Some(identity.clone());
                self.emit(TransportEvent::IdentityConfirmed(identity));
            }
            _ => {}
        }
    }

    /// First answer wins; later progress for the same query is ignored.
    fn handle_record_lookup(&mut self, query: kad::QueryId, owner: Option<PeerId>) {
        if let Some(Registration::Lookup(identity)) = self.registrations.remove(&query) {
            match owner {
                Some(owner) if owner != self.local_peer_id => {
                    log::warn!("Identity {identity} is owned by {owner}");
                    self.emit(TransportEvent::IdentityUnavailable(identity));
                }
                _ => self.publish_identity(identity),
            }
            return;
        }

        if let Some((remote, channel)) = self.lookups.remove(&query) {
            let Some(peer) = owner else {
                log::warn!("Identity {remote} not found on the network");
                return;
            };
            let Some(local) = self.local_identity.as_ref() else {
                return;
            };
            let request = self.swarm.behaviour_mut().channels.send_request(
                &peer,
                Envelope::Open {
                    from: local.to_string(),
                    channel,
                },
            );
            self.opening.insert(request, (remote, channel, peer));
        }
    }

    fn publish_identity(&mut self, identity: Identity) {
        let record = identity_record(&identity, self.local_peer_id);
        match self
            .swarm
            .behaviour_mut()
            .kad
            .put_record(record, kad::Quorum::One)
        {
            Ok(query) => {
                self.registrations
                    .insert(query, Registration::Publish(identity));
            }
            Err(err) => {
                log::error!("Failed to store identity record for {identity}: {err:?}");
                self.emit(TransportEvent::IdentityUnavailable(identity));
            }
        }
    }

    /// Pushes the record's expiry forward. Once this stops, copies held
    /// elsewhere lapse and the name is free again.
    fn republish_identity(&mut self) {
        let Some(identity) = self.local_identity.as_ref() else {
            return;
        };
        let record = identity_record(identity, self.local_peer_id);
        if let Err(err) = self
            .swarm
            .behaviour_mut()
            .kad
            .put_record(record, kad::Quorum::One)
        {
            log::warn!("Failed to refresh identity record for {identity}: {err:?}");
        }
    }

    fn handle_channel_event(&mut self, event: request_response::Event<Envelope, Ack>) {
        match event {
            request_response::Event::Message {
                peer,
                message:
                    request_response::Message::Request {
                        request, channel, ..
                    },
                ..
            } => {
                let ack = self.handle_envelope(peer, request);
                if self
                    .swarm
                    .behaviour_mut()
                    .channels
                    .send_response(channel, ack)
                    .is_err()
                {
                    log::debug!("Could not acknowledge request from {peer}");
                }
            }
            request_response::Event::Message {
                message:
                    request_response::Message::Response {
                        request_id,
                        response,
                    },
                ..
            } => {
                let Some((remote, channel, peer)) = self.opening.remove(&request_id) else {
                    return;
                };
                match response {
                    Ack::Accepted => {
                        self.channels.insert(channel, peer);
                        self.emit(TransportEvent::ChannelOpened { remote, channel });
                    }
                    Ack::Rejected => log::warn!("{remote} refused channel {channel}"),
                }
            }
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                if let Some((remote, channel, _)) = self.opening.remove(&request_id) {
                    log::warn!("Opening channel {channel} to {remote} failed: {error}");
                } else {
                    log::warn!("Request to {peer} failed: {error}");
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                log::warn!("Inbound request from {peer} failed: {error}");
            }
            _ => {}
        }
    }

    fn handle_envelope(&mut self, peer: PeerId, envelope: Envelope) -> Ack {
        match envelope {
            Envelope::Open { from, channel } => {
                if self.local_identity.is_none() {
                    return Ack::Rejected;
                }
                let Ok(remote) = Identity::new(&from) else {
                    return Ack::Rejected;
                };
                self.channels.insert(channel, peer);
                self.emit(TransportEvent::InboundChannel { remote, channel });
                Ack::Accepted
            }
            Envelope::Data { channel, payload } => {
                if self.channels.get(&channel) != Some(&peer) {
                    return Ack::Rejected;
                }
                self.emit(TransportEvent::ChannelData {
                    channel,
                    payload: payload.into_bytes(),
                });
                Ack::Accepted
            }
            Envelope::Close { channel } => {
                if self.channels.get(&channel) == Some(&peer) {
                    self.channels.remove(&channel);
                    self.emit(TransportEvent::ChannelClosed { channel });
                }
                Ack::Accepted
            }
        }
    }
}
