mod cipher_key;
mod receiving;
mod sending;
mod skipped;

pub use cipher_key::CipherKey;
pub use receiving::{DiscoveredHeader, ReceivingChain, ReceivingChainState};
pub use sending::SendingChain;
pub use skipped::{SkippedKeyEntry, SkippedKeyStore};

use crate::crypto::hmac_label;
use crate::error::Error;
use crate::ratchet::EpochKeys;
use zeroize::{Zeroize, ZeroizeOnDrop};

const MESSAGE_KEY_INFO: &[u8] = b"RatchetChain-Message-Key";

/// Serializable snapshot of a chain's position and live keys.
#[derive(Clone, Debug, Zeroize, ZeroizeOnDrop)]
pub struct ChainCoreState {
    /// Number of `step()` calls performed in the current epoch.
    pub count: u32,
    /// Symmetric chain secret, absent until the first epoch begins.
    pub chain_key: Option<[u8; 32]>,
    /// Header key of the current epoch.
    pub header_key: Option<CipherKey>,
    /// Message key for counter value `count`.
    pub message_key: Option<CipherKey>,
    /// Header key the peer will use once it starts a new epoch.
    pub next_header_key: CipherKey,
}

/// Position in a symmetric key chain, shared by both chain directions.
///
/// Invariant: when active, `message_key` is the key for counter value `count`
/// and `chain_key` is the secret the key for `count + 1` will be derived from.
/// The header key is fixed for the lifetime of an epoch.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct ChainState {
    pub(crate) count: u32,
    chain_key: Option<[u8; 32]>,
    pub(crate) header_key: Option<CipherKey>,
    pub(crate) message_key: Option<CipherKey>,
    pub(crate) next_header_key: CipherKey,
}

impl ChainState {
    /// A chain waiting for its first epoch; only the next header key is known.
    pub(crate) fn pending(next_header_key: CipherKey) -> Self {
        Self {
            count: 0,
            chain_key: None,
            header_key: None,
            message_key: None,
            next_header_key,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.chain_key.is_some()
    }

    /// Starts a new epoch: the old next header key becomes current and the
    /// count restarts from zero.
    pub(crate) fn begin_epoch(&mut self, keys: &EpochKeys) -> Result<(), Error> {
        let (chain_key, message_key) = Self::advance(keys.chain_key())?;

        let header_key =
            std::mem::replace(&mut self.next_header_key, keys.next_header_key().clone());
        self.header_key = Some(header_key);
        self.message_key = Some(message_key);
        self.chain_key = Some(chain_key);
        self.count = 0;

        Ok(())
    }

    /// Derives the next message key and moves `count` forward by one.
    ///
    /// The previous message key is dropped (and zeroized) here.
    pub(crate) fn step(&mut self) -> Result<(), Error> {
        let current = self
            .chain_key
            .as_ref()
            .ok_or_else(|| Error::Protocol("Chain has no active epoch".to_string()))?;

        let (chain_key, message_key) = Self::advance(current)?;
        self.chain_key = Some(chain_key);
        self.message_key = Some(message_key);
        self.count = self.count.wrapping_add(1);

        Ok(())
    }

    fn advance(chain_key: &[u8; 32]) -> Result<([u8; 32], CipherKey), Error> {
        let next_chain_key = hmac_label(chain_key, 0x01)?;
        let mut message_seed = hmac_label(chain_key, 0x02)?;
        let message_key = CipherKey::derive(&message_seed, MESSAGE_KEY_INFO);
        message_seed.zeroize();

        Ok((next_chain_key, message_key?))
    }

    pub(crate) fn core_state(&self) -> ChainCoreState {
        ChainCoreState {
            count: self.count,
            chain_key: self.chain_key,
            header_key: self.header_key.clone(),
            message_key: self.message_key.clone(),
            next_header_key: self.next_header_key.clone(),
        }
    }

    pub(crate) fn from_core_state(state: &ChainCoreState) -> Self {
        Self {
            count: state.count,
            chain_key: state.chain_key,
            header_key: state.header_key.clone(),
            message_key: state.message_key.clone(),
            next_header_key: state.next_header_key.clone(),
        }
    }
}
