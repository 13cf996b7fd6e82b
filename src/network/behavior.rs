use std::error::Error;
use std::time::{Duration, Instant};

use libp2p::kad::{self, Mode as KadMode, store::MemoryStore};
use libp2p::request_response::{self, ProtocolSupport};
use libp2p::swarm::NetworkBehaviour;
use libp2p::{PeerId, StreamProtocol, identify, identity};
use serde::{Deserialize, Serialize};

use crate::common::{ChannelId, Identity};

pub const CHANNEL_PROTOCOL: StreamProtocol = StreamProtocol::new("/peer-chat/channel/1.0.0");
const IDENTIFY_PROTOCOL: &str = "peer-chat/1.0.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Inline media travels as base64 inside one request.
const MAX_REQUEST_BYTES: u64 = 64 * 1024 * 1024;

/// Lifetime of a published identity record. Copies held by other nodes
/// lapse this long after the owner stops republishing.
pub const IDENTITY_TTL: Duration = Duration::from_secs(60);
pub const IDENTITY_REPUBLISH: Duration = Duration::from_secs(20);

/// Requests exchanged over the channel protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Open { from: String, channel: ChannelId },
    /// `payload` is an encoded chat message, which is already JSON text.
    Data { channel: ChannelId, payload: String },
    Close { channel: ChannelId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ack {
    Accepted,
    Rejected,
}

#[derive(NetworkBehaviour)]
pub struct ChatBehavior {
    pub kad: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
    pub channels: request_response::json::Behaviour<Envelope, Ack>,
}

type ChannelCodec = request_response::json::codec::Codec<Envelope, Ack>;

fn channel_codec() -> ChannelCodec {
    ChannelCodec::default().set_request_size_maximum(MAX_REQUEST_BYTES)
}

pub fn build_behavior(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
) -> Result<ChatBehavior, Box<dyn Error>> {
    let store = MemoryStore::new(local_peer_id);
    let mut kad = kad::Behaviour::new(local_peer_id, store);
    kad.set_mode(Some(KadMode::Server));

    let identify_config =
        identify::Config::new(IDENTIFY_PROTOCOL.into(), local_key.public());
    let identify = identify::Behaviour::new(identify_config);

    let channels = request_response::Behaviour::with_codec(
        channel_codec(),
        [(CHANNEL_PROTOCOL, ProtocolSupport::Full)],
        request_response::Config::default().with_request_timeout(REQUEST_TIMEOUT),
    );

    Ok(ChatBehavior {
        kad,
        identify,
        channels,
    })
}

/// DHT key under which a username maps to the PeerId that claimed it.
pub fn identity_key(identity: &Identity) -> kad::RecordKey {
    kad::RecordKey::new(&format!("peer-chat/identity/{identity}"))
}

/// Record claiming `identity` for `owner`, valid for [`IDENTITY_TTL`].
pub fn identity_record(identity: &Identity, owner: PeerId) -> kad::Record {
    let mut record = kad::Record::new(identity_key(identity), owner.to_bytes());
    record.expires = Some(Instant::now() + IDENTITY_TTL);
    record
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use futures::io::Cursor;
    use libp2p::request_response::Codec;

    use super::*;
    use crate::common::MessageKind;
    use crate::session::codec;

    #[test]
    fn envelope_is_tagged_json() {
        let channel = ChannelId::new();
        let json = serde_json::to_string(&Envelope::Open {
            from: "bob".into(),
            channel,
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"open\""));
        assert!(json.contains("\"from\":\"bob\""));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed,
            Envelope::Open {
                from: "bob".into(),
                channel
            }
        );
    }

    #[test]
    fn identity_keys_are_namespaced() {
        let key = identity_key(&Identity::new("alice").unwrap());
        assert_eq!(key.to_vec(), b"peer-chat/identity/alice".to_vec());
    }

    #[tokio::test]
    async fn large_image_fits_one_data_request() {
        let image = vec![0x5A; 2 * 1024 * 1024];
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(&image));
        let message = codec::encode(&Identity::new("alice").unwrap(), &data_url, MessageKind::Image)
            .to_bytes()
            .unwrap();
        let envelope = Envelope::Data {
            channel: ChannelId::new(),
            payload: String::from_utf8(message).unwrap(),
        };

        let mut wire_codec = channel_codec();
        let mut wire = Vec::new();
        wire_codec
            .write_request(&CHANNEL_PROTOCOL, &mut wire, envelope.clone())
            .await
            .unwrap();
        // Text payloads stay close to their own size on the wire.
        assert!(wire.len() < 3 * 1024 * 1024);

        let decoded = wire_codec
            .read_request(&CHANNEL_PROTOCOL, &mut Cursor::new(wire))
            .await
            .unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn identity_records_expire_after_republish_interval() {
        let owner = PeerId::random();
        let before = Instant::now();
        let record = identity_record(&Identity::new("alice").unwrap(), owner);

        assert_eq!(PeerId::from_bytes(&record.value).unwrap(), owner);
        let expires = record.expires.unwrap();
        assert!(expires > before + IDENTITY_REPUBLISH);
        assert!(expires <= Instant::now() + IDENTITY_TTL);
    }
}
