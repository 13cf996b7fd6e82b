use std::collections::{BTreeSet, HashMap};

use crate::common::{ChannelId, Identity};

/// Tracks the connected peer and every channel open towards each peer.
///
/// Only one identity is "current" at a time, but several channels to the
/// same identity may coexist and all of them receive outbound messages.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: HashMap<Identity, BTreeSet<ChannelId>>,
    owners: HashMap<ChannelId, Identity>,
    current: Option<Identity>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a channel the remote side opened. Returns true when the
    /// current connection changed.
    pub fn record_inbound(&mut self, remote: Identity, channel: ChannelId) -> bool {
        self.record(remote, channel)
    }

    /// Records a locally initiated channel once it has opened.
    pub fn record_outbound(&mut self, remote: Identity, channel: ChannelId) -> bool {
        self.record(remote, channel)
    }

    fn record(&mut self, remote: Identity, channel: ChannelId) -> bool {
        if let Some(previous) = self.owners.insert(channel, remote.clone()) {
            if previous != remote {
                self.detach(&previous, channel);
            }
        }
        self.channels.entry(remote.clone()).or_default().insert(channel);

        // Last write wins for display; earlier channels stay open.
        if self.current.as_ref() == Some(&remote) {
            false
        } else {
            log::info!("Current connection is now {remote}");
            self.current = Some(remote);
            true
        }
    }

    pub fn channels_for(&self, remote: &Identity) -> Vec<ChannelId> {
        self.channels
            .get(remote)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn current(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    pub fn owner_of(&self, channel: ChannelId) -> Option<&Identity> {
        self.owners.get(&channel)
    }

    /// Forgets a closed channel. The current connection is kept even when
    /// its last channel goes away.
    pub fn remove_channel(&mut self, channel: ChannelId) -> Option<Identity> {
        let remote = self.owners.remove(&channel)?;
        self.detach(&remote, channel);
        Some(remote)
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.owners.clear();
        self.current = None;
    }

    fn detach(&mut self, remote: &Identity, channel: ChannelId) {
        if let Some(set) = self.channels.get_mut(remote) {
            set.remove(&channel);
            if set.is_empty() {
                self.channels.remove(remote);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[test]
    fn inbound_and_outbound_channels_to_one_peer_are_merged() {
        let mut registry = ConnectionRegistry::new();
        let outbound = ChannelId::new();
        let inbound = ChannelId::new();

        assert!(registry.record_outbound(id("alice"), outbound));
        assert!(!registry.record_inbound(id("alice"), inbound));

        let channels = registry.channels_for(&id("alice"));
        assert_eq!(channels.len(), 2);
        assert!(channels.contains(&outbound));
        assert!(channels.contains(&inbound));
        assert_eq!(registry.current(), Some(&id("alice")));
    }

    #[test]
    fn newer_peer_becomes_current_without_dropping_old_channels() {
        let mut registry = ConnectionRegistry::new();
        let to_alice = ChannelId::new();
        let to_carol = ChannelId::new();

        registry.record_inbound(id("alice"), to_alice);
        assert!(registry.record_inbound(id("carol"), to_carol));

        assert_eq!(registry.current(), Some(&id("carol")));
        assert_eq!(registry.channels_for(&id("alice")), vec![to_alice]);
        assert_eq!(registry.channels_for(&id("carol")), vec![to_carol]);
    }

    #[test]
    fn unknown_identity_has_no_channels() {
        let registry = ConnectionRegistry::new();
        assert!(registry.channels_for(&id("nobody")).is_empty());
        assert_eq!(registry.current(), None);
    }

    #[test]
    fn closing_a_channel_keeps_the_current_connection() {
        let mut registry = ConnectionRegistry::new();
        let channel = ChannelId::new();
        registry.record_outbound(id("alice"), channel);

        assert_eq!(registry.remove_channel(channel), Some(id("alice")));
        assert!(registry.channels_for(&id("alice")).is_empty());
        assert_eq!(registry.current(), Some(&id("alice")));
        assert_eq!(registry.remove_channel(channel), None);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut registry = ConnectionRegistry::new();
        let channel = ChannelId::new();
        registry.record_inbound(id("alice"), channel);
        registry.clear();

        assert_eq!(registry.current(), None);
        assert_eq!(registry.owner_of(channel), None);
        assert!(registry.channels_for(&id("alice")).is_empty());
    }
}
