//! Node identity and the libp2p transport stack.

use std::error::Error;
use std::fs;
use std::path::Path;

use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::Boxed;
use libp2p::core::upgrade::Version;
use libp2p::{PeerId, Transport, dns, identity, noise, tcp, yamux};

pub type BoxedTransport = Boxed<(PeerId, StreamMuxerBox)>;

/// TCP with DNS resolution, secured by Noise and multiplexed by Yamux.
pub fn build_transport(local_key: &identity::Keypair) -> Result<BoxedTransport, Box<dyn Error>> {
    let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    Ok(dns::tokio::Transport::system(tcp_transport)?
        .upgrade(Version::V1)
        .authenticate(noise::Config::new(local_key)?)
        .multiplex(yamux::Config::default())
        .boxed())
}

/// Keeps the node's PeerId stable across restarts so identity records
/// published earlier still point at us.
pub(crate) fn load_or_generate_local_key(path: &Path) -> Result<identity::Keypair, Box<dyn Error>> {
    if path.exists() {
        let bytes = fs::read(path)?;
        let keypair = identity::Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| format!("Failed to decode node key: {e}"))?;
        log::info!("Loaded node key from {}", path.display());
        Ok(keypair)
    } else {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let keypair = identity::Keypair::generate_ed25519();
        let encoded = keypair
            .to_protobuf_encoding()
            .map_err(|e| format!("Failed to encode node key: {e}"))?;
        fs::write(path, encoded)?;
        log::info!("Generated new node key at {}", path.display());
        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_is_persisted_and_reused() {
        let path = std::env::temp_dir().join(format!("peer_chat_key_{}.pk", std::process::id()));
        let _ = fs::remove_file(&path);

        let first = load_or_generate_local_key(&path).unwrap();
        let second = load_or_generate_local_key(&path).unwrap();
        assert_eq!(PeerId::from(first.public()), PeerId::from(second.public()));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn corrupt_key_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("peer_chat_bad_key_{}.pk", std::process::id()));
        fs::write(&path, b"not a key").unwrap();

        assert!(load_or_generate_local_key(&path).is_err());

        fs::remove_file(&path).unwrap();
    }
}
