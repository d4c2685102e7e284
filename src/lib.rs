mod types;
pub use types::{X25519PublicKey, X25519Secret};

mod chain;
pub use chain::{
    ChainCoreState, CipherKey, DiscoveredHeader, ReceivingChain, ReceivingChainState, SendingChain,
    SkippedKeyEntry, SkippedKeyStore,
};

mod crypto;

mod envelope;
pub use envelope::*;

mod ratchet;
pub use ratchet::{DhRatchet, EpochKeys, Ratchet};

mod error;
pub use error::Error;

mod config;
pub use config::ChainConfig;

mod session;
pub use session::Session;

mod proto;
