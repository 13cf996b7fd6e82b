use std::collections::HashSet;
use std::pin::pin;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::common::{ChannelId, Identity, Message, MessageKind, SessionCommand, SessionEvent};
use crate::network::{PeerTransport, TransportEvent};

use super::dispatcher::{self, OutboundDispatcher};
use super::history::History;
use super::identity::Registration;
use super::media::{self, EncodeEvent, MediaFile};
use super::registry::ConnectionRegistry;

/// Coarse lifecycle of a session, derived from its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registering,
    Ready,
    Connected,
}

/// Media encoder output tagged with the login it belongs to.
#[derive(Debug)]
struct MediaUpdate {
    epoch: u64,
    event: EncodeEvent,
}

/// Owns the local identity, the connection registry and the history, and
/// applies UI commands and transport events to them one at a time.
pub struct Session<T: PeerTransport> {
    transport: T,
    registration: Registration,
    registry: ConnectionRegistry,
    history: History,
    pending_connects: HashSet<ChannelId>,
    upload_progress: Option<u8>,
    /// Bumped on logout so uploads started earlier are discarded.
    upload_epoch: u64,
    event_sender: mpsc::Sender<SessionEvent>,
    media_sender: mpsc::UnboundedSender<MediaUpdate>,
    media_receiver: Option<mpsc::UnboundedReceiver<MediaUpdate>>,
}

impl<T: PeerTransport> Session<T> {
    pub fn new(transport: T, event_sender: mpsc::Sender<SessionEvent>) -> Self {
        let (media_sender, media_receiver) = mpsc::unbounded_channel();
        Self {
            transport,
            registration: Registration::Unregistered,
            registry: ConnectionRegistry::new(),
            history: History::new(),
            pending_connects: HashSet::new(),
            upload_progress: None,
            upload_epoch: 0,
            event_sender,
            media_sender,
            media_receiver: Some(media_receiver),
        }
    }

    /// Processes commands, transport events and encoder output until the
    /// command channel closes.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let Some(mut media_updates) = self.media_receiver.take() else {
            log::error!("Session loop started twice");
            return;
        };
        log::info!("Session event loop started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                Some(event) = transport_events.recv() => {
                    self.handle_transport_event(event).await;
                }
                Some(update) = media_updates.recv() => {
                    self.handle_media_update(update).await;
                }
            }
        }

        self.transport.close();
        log::info!("Session event loop stopped");
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.registration.confirmed()
    }

    pub fn connection_target(&self) -> Option<&Identity> {
        self.registry.current()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn upload_progress(&self) -> Option<u8> {
        self.upload_progress
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn state(&self) -> SessionState {
        match &self.registration {
            Registration::Unregistered => SessionState::Unregistered,
            Registration::Pending(_) => SessionState::Registering,
            Registration::Confirmed(_) if self.registry.current().is_some() => {
                SessionState::Connected
            }
            Registration::Confirmed(_) => SessionState::Ready,
        }
    }

    pub async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::RegisterIdentity(name) => self.register(&name).await,
            SessionCommand::Connect(target) => self.connect(&target),
            SessionCommand::SendText(text) => {
                if text.trim().is_empty() {
                    return;
                }
                self.send(text, MessageKind::Text).await;
            }
            SessionCommand::SendFile(file) => self.start_upload(file),
            SessionCommand::Logout => self.logout().await,
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IdentityConfirmed(identity) => {
                if self.registration.confirm(&identity) {
                    log::info!("Identity confirmed: {identity}");
                    self.emit(SessionEvent::IdentityChanged(Some(identity))).await;
                } else {
                    log::debug!("Ignoring stale confirmation for {identity}");
                }
            }
            TransportEvent::IdentityUnavailable(identity) => {
                if self.registration.reject(&identity) {
                    log::warn!("Identity {identity} is already taken");
                    self.emit(SessionEvent::RegistrationFailed(identity)).await;
                }
            }
            TransportEvent::InboundChannel { remote, channel } => {
                if self.registration.confirmed().is_none() {
                    log::debug!("Ignoring inbound channel from {remote} before registration");
                    return;
                }
                log::info!("Inbound channel {channel} from {remote}");
                if self.registry.record_inbound(remote.clone(), channel) {
                    self.emit(SessionEvent::ConnectionChanged(Some(remote))).await;
                }
            }
            TransportEvent::ChannelOpened { remote, channel } => {
                if !self.pending_connects.remove(&channel) {
                    log::debug!("Ignoring channel {channel} that was not requested");
                    return;
                }
                log::info!("Channel {channel} to {remote} is open");
                if self.registry.record_outbound(remote.clone(), channel) {
                    self.emit(SessionEvent::ConnectionChanged(Some(remote))).await;
                }
            }
            TransportEvent::ChannelData { channel, payload } => {
                if self.registry.owner_of(channel).is_none() {
                    log::debug!("Dropping data on untracked channel {channel}");
                    return;
                }
                if let Some(message) = dispatcher::receive(&mut self.history, &payload) {
                    self.emit(SessionEvent::MessageAppended(message)).await;
                }
            }
            TransportEvent::ChannelClosed { channel } => {
                self.pending_connects.remove(&channel);
                if let Some(remote) = self.registry.remove_channel(channel) {
                    log::info!("Channel {channel} to {remote} closed");
                }
            }
        }
    }

    async fn register(&mut self, name: &str) {
        if self.registration != Registration::Unregistered {
            log::warn!("Already registered; log out before choosing another name");
            return;
        }
        match Registration::begin(&mut self.transport, name) {
            Ok(registration) => self.registration = registration,
            Err(err) => log::warn!("Registration failed: {err}"),
        }
    }

    fn connect(&mut self, target: &str) {
        if self.registration.confirmed().is_none() {
            log::warn!("Cannot connect before the identity is confirmed");
            return;
        }
        let Ok(target) = Identity::new(target) else {
            return;
        };
        match self.transport.connect_to(&target) {
            Ok(channel) => {
                log::info!("Connecting to {target} over {channel}");
                self.pending_connects.insert(channel);
            }
            Err(err) => log::warn!("Failed to connect to {target}: {err}"),
        }
    }

    async fn send(&mut self, content: String, kind: MessageKind) -> Option<Message> {
        let message = OutboundDispatcher {
            local: self.registration.confirmed(),
            registry: &self.registry,
            transport: &mut self.transport,
            history: &mut self.history,
        }
        .send(content, kind)?;
        self.emit(SessionEvent::MessageAppended(message.clone())).await;
        Some(message)
    }

    fn start_upload(&mut self, file: MediaFile) {
        log::info!("Encoding {} ({})", file.name, file.content_type);
        let epoch = self.upload_epoch;
        let sender = self.media_sender.clone();
        tokio::spawn(async move {
            let mut events = pin!(media::encode(file));
            while let Some(event) = events.next().await {
                if sender.send(MediaUpdate { epoch, event }).is_err() {
                    break;
                }
            }
        });
    }

    async fn handle_media_update(&mut self, update: MediaUpdate) {
        if update.epoch != self.upload_epoch {
            return;
        }
        match update.event {
            EncodeEvent::Progress(percent) => {
                self.upload_progress = Some(percent);
                self.emit(SessionEvent::UploadProgress(Some(percent))).await;
            }
            EncodeEvent::Finished(media) => {
                self.send(media.data_url, media.kind).await;
                self.clear_upload_progress().await;
            }
            EncodeEvent::Failed(err) => {
                log::warn!("Upload failed: {err}");
                self.clear_upload_progress().await;
                self.emit(SessionEvent::UploadFailed(err.to_string())).await;
            }
        }
    }

    async fn clear_upload_progress(&mut self) {
        self.upload_progress = None;
        self.emit(SessionEvent::UploadProgress(None)).await;
    }

    async fn logout(&mut self) {
        log::info!("Logging out");
        self.transport.close();
        self.registration = Registration::Unregistered;
        self.registry.clear();
        self.history.clear();
        self.pending_connects.clear();
        self.upload_epoch += 1;
        let had_upload = self.upload_progress.take().is_some();

        self.emit(SessionEvent::IdentityChanged(None)).await;
        self.emit(SessionEvent::ConnectionChanged(None)).await;
        self.emit(SessionEvent::HistoryCleared).await;
        if had_upload {
            self.emit(SessionEvent::UploadProgress(None)).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::debug!("UI is gone; dropped {:?}", err.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryNetwork;

    struct Peer {
        session: Session<crate::network::MemoryTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        ui_events: mpsc::Receiver<SessionEvent>,
    }

    impl Peer {
        fn new(network: &MemoryNetwork) -> Self {
            let (transport_tx, transport_events) = mpsc::unbounded_channel();
            let (ui_tx, ui_events) = mpsc::channel(64);
            Self {
                session: Session::new(network.transport(transport_tx), ui_tx),
                transport_events,
                ui_events,
            }
        }

        async fn pump(&mut self) {
            while let Ok(event) = self.transport_events.try_recv() {
                self.session.handle_transport_event(event).await;
            }
        }
    }

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[tokio::test]
    async fn registration_walks_through_states() {
        let network = MemoryNetwork::new();
        let mut alice = Peer::new(&network);
        assert_eq!(alice.session.state(), SessionState::Unregistered);

        alice
            .session
            .handle_command(SessionCommand::RegisterIdentity("alice".into()))
            .await;
        assert_eq!(alice.session.state(), SessionState::Registering);
        assert_eq!(alice.session.identity(), None);

        alice.pump().await;
        assert_eq!(alice.session.state(), SessionState::Ready);
        assert_eq!(alice.session.identity(), Some(&id("alice")));
        assert_eq!(
            alice.ui_events.try_recv().unwrap(),
            SessionEvent::IdentityChanged(Some(id("alice")))
        );
    }

    #[tokio::test]
    async fn taken_name_reports_failure_and_resets() {
        let network = MemoryNetwork::new();
        let mut first = Peer::new(&network);
        let mut second = Peer::new(&network);
        for peer in [&mut first, &mut second] {
            peer.session
                .handle_command(SessionCommand::RegisterIdentity("alice".into()))
                .await;
            peer.pump().await;
        }

        assert_eq!(second.session.state(), SessionState::Unregistered);
        assert_eq!(
            second.ui_events.try_recv().unwrap(),
            SessionEvent::RegistrationFailed(id("alice"))
        );
    }

    #[tokio::test]
    async fn connect_before_registration_does_nothing() {
        let network = MemoryNetwork::new();
        let mut bob = Peer::new(&network);
        bob.session
            .handle_command(SessionCommand::Connect("alice".into()))
            .await;
        bob.pump().await;
        assert_eq!(bob.session.connection_target(), None);
        assert_eq!(network.open_channels(), 0);
    }

    #[tokio::test]
    async fn send_while_unconnected_leaves_history_untouched() {
        let network = MemoryNetwork::new();
        let mut alice = Peer::new(&network);
        alice
            .session
            .handle_command(SessionCommand::RegisterIdentity("alice".into()))
            .await;
        alice.pump().await;

        alice
            .session
            .handle_command(SessionCommand::SendText("hello?".into()))
            .await;
        assert!(alice.session.history().is_empty());
    }

    #[tokio::test]
    async fn blank_text_is_not_sent() {
        let network = MemoryNetwork::new();
        let mut alice = Peer::new(&network);
        let mut bob = Peer::new(&network);
        for (peer, name) in [(&mut alice, "alice"), (&mut bob, "bob")] {
            peer.session
                .handle_command(SessionCommand::RegisterIdentity(name.into()))
                .await;
            peer.pump().await;
        }
        bob.session
            .handle_command(SessionCommand::Connect("alice".into()))
            .await;
        bob.pump().await;

        bob.session
            .handle_command(SessionCommand::SendText("   ".into()))
            .await;
        assert!(bob.session.history().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_everything_and_frees_the_name() {
        let network = MemoryNetwork::new();
        let mut alice = Peer::new(&network);
        let mut bob = Peer::new(&network);
        for (peer, name) in [(&mut alice, "alice"), (&mut bob, "bob")] {
            peer.session
                .handle_command(SessionCommand::RegisterIdentity(name.into()))
                .await;
            peer.pump().await;
        }
        bob.session
            .handle_command(SessionCommand::Connect("alice".into()))
            .await;
        bob.pump().await;
        bob.session
            .handle_command(SessionCommand::SendText("hi".into()))
            .await;
        assert_eq!(bob.session.state(), SessionState::Connected);

        bob.session.handle_command(SessionCommand::Logout).await;
        assert_eq!(bob.session.state(), SessionState::Unregistered);
        assert_eq!(bob.session.connection_target(), None);
        assert!(bob.session.history().is_empty());
        assert!(bob.session.registry().channels_for(&id("alice")).is_empty());
        assert_eq!(network.open_channels(), 0);

        let mut carol = Peer::new(&network);
        carol
            .session
            .handle_command(SessionCommand::RegisterIdentity("bob".into()))
            .await;
        carol.pump().await;
        assert_eq!(carol.session.identity(), Some(&id("bob")));
    }

    #[tokio::test]
    async fn unrequested_channel_open_is_ignored() {
        let network = MemoryNetwork::new();
        let mut alice = Peer::new(&network);
        alice
            .session
            .handle_command(SessionCommand::RegisterIdentity("alice".into()))
            .await;
        alice.pump().await;

        alice
            .session
            .handle_transport_event(TransportEvent::ChannelOpened {
                remote: id("mallory"),
                channel: ChannelId::new(),
            })
            .await;
        assert_eq!(alice.session.connection_target(), None);
    }
}
