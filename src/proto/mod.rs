use crate::chain::ChainCoreState;
use crate::ratchet::EpochKeys;
use crate::{
    ChainConfig, CipherKey, DhRatchet, Error, Ratchet, ReceivingChain, ReceivingChainState,
    SendingChain, Session, SkippedKeyEntry, X25519PublicKey, X25519Secret,
};
use prost::Message;
use std::cell::RefCell;
use std::rc::Rc;

const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Message)]
pub struct ChainConfigProto {
    #[prost(uint32, tag = "1")]
    pub message_key_ttl: u32,
    #[prost(uint32, tag = "2")]
    pub max_skip: u32,
    #[prost(uint64, tag = "3")]
    pub max_skipped_keys: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChainStateProto {
    #[prost(uint32, tag = "1")]
    pub count: u32,
    /// Empty while the chain waits for its first epoch.
    #[prost(bytes = "vec", tag = "2")]
    pub chain_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub header_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub message_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub next_header_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SkippedKeyProto {
    #[prost(bytes = "vec", tag = "1")]
    pub header: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub message: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub missed: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReceivingChainProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(message, optional, tag = "2")]
    pub core: Option<ChainStateProto>,
    #[prost(message, repeated, tag = "3")]
    pub skipped: Vec<SkippedKeyProto>,
    #[prost(message, optional, tag = "4")]
    pub config: Option<ChainConfigProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SendingChainProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(message, optional, tag = "2")]
    pub core: Option<ChainStateProto>,
    #[prost(uint32, tag = "3")]
    pub previous: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RatchetProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub root_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub dh_pair: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub remote_public: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub pending_chain_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub pending_next_header_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(message, optional, tag = "2")]
    pub ratchet: Option<RatchetProto>,
    #[prost(message, optional, tag = "3")]
    pub sending: Option<SendingChainProto>,
    #[prost(message, optional, tag = "4")]
    pub receiving: Option<ReceivingChainProto>,
}

fn encode<M: Message>(message: &M, what: &str) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(message.encoded_len());
    message
        .encode(&mut buf)
        .map_err(|err| Error::Serde(format!("Failed to encode {what}: {err:?}")))?;
    Ok(buf)
}

fn check_version(version: u32) -> Result<(), Error> {
    if version != SCHEMA_VERSION {
        return Err(Error::Serde(format!("Unsupported schema version: {version}")));
    }
    Ok(())
}

fn key_32(bytes: &[u8], what: &str) -> Result<[u8; 32], Error> {
    <[u8; 32]>::try_from(bytes).map_err(|_| Error::Serde(format!("Invalid {what} length")))
}

fn optional_key_32(bytes: &[u8], what: &str) -> Result<Option<[u8; 32]>, Error> {
    if bytes.is_empty() {
        return Ok(None);
    }
    key_32(bytes, what).map(Some)
}

fn optional_cipher_key(bytes: &[u8]) -> Result<Option<CipherKey>, Error> {
    if bytes.is_empty() {
        return Ok(None);
    }
    CipherKey::try_from(bytes).map(Some)
}

fn cipher_key_bytes(key: Option<&CipherKey>) -> Vec<u8> {
    key.map(|key| key.to_bytes().to_vec()).unwrap_or_default()
}

impl From<&ChainConfig> for ChainConfigProto {
    fn from(config: &ChainConfig) -> Self {
        Self {
            message_key_ttl: config.message_key_ttl,
            max_skip: config.max_skip,
            max_skipped_keys: config.max_skipped_keys as u64,
        }
    }
}

impl TryFrom<ChainConfigProto> for ChainConfig {
    type Error = Error;

    fn try_from(proto: ChainConfigProto) -> Result<Self, Self::Error> {
        Ok(Self {
            message_key_ttl: proto.message_key_ttl,
            max_skip: proto.max_skip,
            max_skipped_keys: usize::try_from(proto.max_skipped_keys)
                .map_err(|_| Error::Serde("Invalid skipped key capacity".to_string()))?,
        })
    }
}

impl From<&ChainCoreState> for ChainStateProto {
    fn from(state: &ChainCoreState) -> Self {
        Self {
            count: state.count,
            chain_key: state.chain_key.map(|key| key.to_vec()).unwrap_or_default(),
            header_key: cipher_key_bytes(state.header_key.as_ref()),
            message_key: cipher_key_bytes(state.message_key.as_ref()),
            next_header_key: state.next_header_key.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<&ChainStateProto> for ChainCoreState {
    type Error = Error;

    fn try_from(proto: &ChainStateProto) -> Result<Self, Self::Error> {
        let state = Self {
            count: proto.count,
            chain_key: optional_key_32(&proto.chain_key, "chain key")?,
            header_key: optional_cipher_key(&proto.header_key)?,
            message_key: optional_cipher_key(&proto.message_key)?,
            next_header_key: CipherKey::try_from(proto.next_header_key.as_slice())?,
        };

        let active = state.chain_key.is_some();
        if active != state.header_key.is_some() || active != state.message_key.is_some() {
            return Err(Error::Serde("Incomplete chain state".to_string()));
        }

        Ok(state)
    }
}

impl From<&SkippedKeyEntry> for SkippedKeyProto {
    fn from(entry: &SkippedKeyEntry) -> Self {
        Self {
            header: entry.header().to_bytes().to_vec(),
            message: entry.message().to_bytes().to_vec(),
            missed: entry.missed(),
        }
    }
}

impl TryFrom<&SkippedKeyProto> for SkippedKeyEntry {
    type Error = Error;

    fn try_from(proto: &SkippedKeyProto) -> Result<Self, Self::Error> {
        let mut entry = SkippedKeyEntry::new(
            CipherKey::try_from(proto.header.as_slice())?,
            CipherKey::try_from(proto.message.as_slice())?,
        );
        entry.missed = proto.missed;
        Ok(entry)
    }
}

impl From<&ReceivingChainState> for ReceivingChainProto {
    fn from(state: &ReceivingChainState) -> Self {
        Self {
            version: SCHEMA_VERSION,
            core: Some(ChainStateProto::from(&state.core)),
            skipped: state.skipped.iter().map(SkippedKeyProto::from).collect(),
            config: None,
        }
    }
}

fn receiving_from_proto<R: Ratchet>(
    ratchet: Rc<RefCell<R>>,
    proto: &ReceivingChainProto,
) -> Result<ReceivingChain<R>, Error> {
    check_version(proto.version)?;

    let core = proto
        .core
        .as_ref()
        .ok_or_else(|| Error::Serde("Missing receiving chain state".to_string()))?;
    let config = proto
        .config
        .clone()
        .ok_or_else(|| Error::Serde("Missing chain config".to_string()))?;

    let state = ReceivingChainState {
        core: ChainCoreState::try_from(core)?,
        skipped: proto
            .skipped
            .iter()
            .map(SkippedKeyEntry::try_from)
            .collect::<Result<_, _>>()?,
    };

    Ok(ReceivingChain::from_state(
        ratchet,
        &state,
        ChainConfig::try_from(config)?,
    ))
}

fn receiving_to_proto<R: Ratchet>(chain: &ReceivingChain<R>) -> ReceivingChainProto {
    ReceivingChainProto {
        config: Some(ChainConfigProto::from(chain.config())),
        ..ReceivingChainProto::from(&chain.state())
    }
}

fn sending_to_proto<R: Ratchet>(chain: &SendingChain<R>) -> SendingChainProto {
    SendingChainProto {
        version: SCHEMA_VERSION,
        core: Some(ChainStateProto::from(&chain.core_state())),
        previous: chain.previous,
    }
}

fn sending_from_proto<R: Ratchet>(
    ratchet: Rc<RefCell<R>>,
    proto: &SendingChainProto,
) -> Result<SendingChain<R>, Error> {
    check_version(proto.version)?;

    let core = proto
        .core
        .as_ref()
        .ok_or_else(|| Error::Serde("Missing sending chain state".to_string()))?;

    Ok(SendingChain::from_parts(
        ratchet,
        &ChainCoreState::try_from(core)?,
        proto.previous,
    ))
}

impl<R: Ratchet> ReceivingChain<R> {
    /// Serializes the chain (skipped keys, core fields and config) to
    /// Protocol Buffers. The ratchet is persisted separately.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        encode(&receiving_to_proto(self), "receiving chain")
    }

    /// Restores a chain serialized with [`ReceivingChain::serialize`].
    pub fn deserialize(ratchet: Rc<RefCell<R>>, bytes: &[u8]) -> Result<Self, Error> {
        let proto = ReceivingChainProto::decode(bytes)
            .map_err(|err| Error::Serde(format!("Failed to decode receiving chain: {err:?}")))?;
        receiving_from_proto(ratchet, &proto)
    }
}

impl<R: Ratchet> SendingChain<R> {
    /// Serializes the chain to Protocol Buffers.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        encode(&sending_to_proto(self), "sending chain")
    }

    /// Restores a chain serialized with [`SendingChain::serialize`].
    pub fn deserialize(ratchet: Rc<RefCell<R>>, bytes: &[u8]) -> Result<Self, Error> {
        let proto = SendingChainProto::decode(bytes)
            .map_err(|err| Error::Serde(format!("Failed to decode sending chain: {err:?}")))?;
        sending_from_proto(ratchet, &proto)
    }
}

impl From<&DhRatchet> for RatchetProto {
    fn from(ratchet: &DhRatchet) -> Self {
        let (pending_chain_key, pending_next_header_key) = match &ratchet.pending_sending {
            Some(keys) => (
                keys.chain_key().to_vec(),
                keys.next_header_key().to_bytes().to_vec(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Self {
            version: SCHEMA_VERSION,
            root_key: ratchet.root_key.to_vec(),
            dh_pair: ratchet.dh_pair.to_bytes().to_vec(),
            remote_public: ratchet
                .remote_public
                .map(|key| key.to_bytes().to_vec())
                .unwrap_or_default(),
            pending_chain_key,
            pending_next_header_key,
        }
    }
}

impl TryFrom<&RatchetProto> for DhRatchet {
    type Error = Error;

    fn try_from(proto: &RatchetProto) -> Result<Self, Self::Error> {
        check_version(proto.version)?;

        let pending_chain_key = optional_key_32(&proto.pending_chain_key, "pending chain key")?;
        let pending_sending = match pending_chain_key {
            Some(chain_key) => Some(EpochKeys::new(
                chain_key,
                CipherKey::try_from(proto.pending_next_header_key.as_slice())?,
            )),
            None => None,
        };

        Ok(DhRatchet {
            root_key: key_32(&proto.root_key, "root key")?,
            dh_pair: X25519Secret::from(key_32(&proto.dh_pair, "DH key pair")?),
            remote_public: optional_key_32(&proto.remote_public, "remote public key")?
                .map(X25519PublicKey::from),
            pending_sending,
        })
    }
}

impl DhRatchet {
    /// Serializes the ratchet to Protocol Buffers.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        encode(&RatchetProto::from(self), "ratchet")
    }

    /// Restores a ratchet serialized with [`DhRatchet::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = RatchetProto::decode(bytes)
            .map_err(|err| Error::Serde(format!("Failed to decode ratchet: {err:?}")))?;
        DhRatchet::try_from(&proto)
    }
}

impl Session {
    /// Serializes the whole session to Protocol Buffers.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let ratchet = self.ratchet.try_borrow().map_err(|_| Error::Session)?;

        let session_proto = SessionProto {
            version: SCHEMA_VERSION,
            ratchet: Some(RatchetProto::from(&*ratchet)),
            sending: Some(sending_to_proto(&self.sending)),
            receiving: Some(receiving_to_proto(&self.receiving)),
        };

        encode(&session_proto, "session")
    }

    /// Restores a session serialized with [`Session::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = SessionProto::decode(bytes)
            .map_err(|err| Error::Serde(format!("Failed to decode session: {err:?}")))?;
        check_version(proto.version)?;

        let ratchet_proto = proto
            .ratchet
            .as_ref()
            .ok_or_else(|| Error::Serde("Missing ratchet data".to_string()))?;
        let sending_proto = proto
            .sending
            .as_ref()
            .ok_or_else(|| Error::Serde("Missing sending chain".to_string()))?;
        let receiving_proto = proto
            .receiving
            .as_ref()
            .ok_or_else(|| Error::Serde("Missing receiving chain".to_string()))?;

        let ratchet = Rc::new(RefCell::new(DhRatchet::try_from(ratchet_proto)?));

        Ok(Session {
            sending: sending_from_proto(Rc::clone(&ratchet), sending_proto)?,
            receiving: receiving_from_proto(Rc::clone(&ratchet), receiving_proto)?,
            ratchet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn create_sessions() -> (Session, Session) {
        let shared_secret = [21u8; 32];
        let bob_pair = X25519Secret::generate().unwrap();
        let bob_public = bob_pair.public_key();

        let alice =
            Session::initiator(&shared_secret, &bob_public, ChainConfig::default()).unwrap();
        let bob = Session::responder(&shared_secret, bob_pair, ChainConfig::default()).unwrap();
        (alice, bob)
    }

    #[test]
    fn test_session_roundtrip_keeps_skipped_keys() {
        let (mut alice, mut bob) = create_sessions();

        let first = alice.encrypt(b"first").unwrap();
        let second = alice.encrypt(b"second").unwrap();
        assert_eq!(bob.decrypt(&second).unwrap(), b"second");

        let mut bob = Session::deserialize(&bob.serialize().unwrap()).unwrap();
        let mut alice = Session::deserialize(&alice.serialize().unwrap()).unwrap();

        assert_eq!(bob.receiving_chain().skipped().len(), 1);
        assert_eq!(bob.decrypt(&first).unwrap(), b"first");

        let reply = bob.encrypt(b"reply").unwrap();
        assert_eq!(alice.decrypt(&reply).unwrap(), b"reply");
    }

    #[test]
    fn test_fresh_responder_roundtrip() {
        let (mut alice, bob) = create_sessions();
        let mut bob = Session::deserialize(&bob.serialize().unwrap()).unwrap();

        let envelope = alice.encrypt(b"hello").unwrap();
        assert_eq!(bob.decrypt(&envelope).unwrap(), b"hello");
    }

    #[test]
    fn test_receiving_chain_roundtrip_keeps_config() {
        let (_alice, bob) = create_sessions();
        let bytes = bob.receiving.serialize().unwrap();
        let restored = ReceivingChain::deserialize(Rc::clone(&bob.ratchet), &bytes).unwrap();
        assert_eq!(restored.config(), &ChainConfig::default());
        assert_eq!(restored.count(), 0);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let proto = SessionProto {
            version: 2,
            ..Default::default()
        };
        let bytes = encode(&proto, "session").unwrap();
        assert!(matches!(Session::deserialize(&bytes), Err(Error::Serde(_))));
    }

    #[test]
    fn test_rejects_bad_key_lengths() {
        let (_alice, bob) = create_sessions();
        let ratchet = bob.ratchet.borrow();
        let mut proto = RatchetProto::from(&*ratchet);
        proto.root_key.pop();
        assert!(matches!(DhRatchet::try_from(&proto), Err(Error::Serde(_))));
    }

    #[test]
    fn test_rejects_incomplete_chain_state() {
        let (alice, _bob) = create_sessions();
        let mut proto = ChainStateProto::from(&alice.receiving.state().core);
        proto.chain_key = vec![1u8; 32];
        assert_matches!(ChainCoreState::try_from(&proto), Err(Error::Serde(_)));
    }
}
