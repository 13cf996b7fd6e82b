use std::fs;
use std::path::{Path, PathBuf};

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

use crate::network::client::NetworkSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/peer_chat.json";
const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Multiaddrs ending in `/p2p/<PeerId>`.
    pub bootstrap_nodes: Vec<String>,
    pub listen_addr: String,
    pub database_path: String,
    pub key_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            database_path: "data/client.db".to_string(),
            key_path: "data/node_key.pk".to_string(),
        }
    }
}

impl AppConfig {
    pub fn network_settings(&self) -> NetworkSettings {
        let listen_addr = self.listen_addr.parse().unwrap_or_else(|err| {
            log::warn!(
                "Invalid listen address `{}` ({err}); using {DEFAULT_LISTEN_ADDR}",
                self.listen_addr
            );
            Multiaddr::empty()
                .with(Protocol::Ip4([0, 0, 0, 0].into()))
                .with(Protocol::Tcp(0))
        });

        NetworkSettings {
            listen_addr,
            bootstrap_peers: parse_bootstrap_peers(&self.bootstrap_nodes),
            key_path: PathBuf::from(&self.key_path),
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn parse_bootstrap_peers(entries: &[String]) -> Vec<(PeerId, Multiaddr)> {
    entries
        .iter()
        .filter_map(|entry| {
            let mut addr: Multiaddr = match entry.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("Invalid multiaddr `{entry}`: {err}");
                    return None;
                }
            };

            let peer_id = match addr.pop() {
                Some(Protocol::P2p(peer)) => peer,
                _ => {
                    log::warn!("Multiaddr `{entry}` missing /p2p/PeerId suffix");
                    return None;
                }
            };

            Some((peer_id, addr))
        })
        .collect()
}
