use crate::chain::CipherKey;
use crate::crypto::hkdf_expand;
use crate::error::Error;
use crate::{X25519PublicKey, X25519Secret};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

const HEADER_KEY_INFO: &[u8] = b"RatchetChain-Header-Key";

/// Key material that opens a new DH ratchet epoch for one chain direction.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EpochKeys {
    chain_key: [u8; 32],
    next_header_key: CipherKey,
}

impl EpochKeys {
    pub fn new(chain_key: [u8; 32], next_header_key: CipherKey) -> Self {
        Self {
            chain_key,
            next_header_key,
        }
    }

    pub(crate) fn chain_key(&self) -> &[u8; 32] {
        &self.chain_key
    }

    pub(crate) fn next_header_key(&self) -> &CipherKey {
        &self.next_header_key
    }
}

/// The Diffie-Hellman side of the double ratchet, as seen by the chains.
///
/// A single instance is shared by the sending and the receiving chain of a
/// session, so implementations must not assume either chain owns them.
pub trait Ratchet {
    /// Performs a DH ratchet step against the peer's new ratchet key and
    /// returns the keys of the new receiving epoch.
    fn ratchet(&mut self, ratchet_key: &X25519PublicKey) -> Result<EpochKeys, Error>;

    /// Our current ratchet public key, sent with every message.
    fn public_key(&self) -> X25519PublicKey;

    /// Hands out a sending epoch produced by the last ratchet step, once.
    fn take_sending_epoch(&mut self) -> Option<EpochKeys>;
}

/// X25519 / HKDF-SHA256 root-key ratchet.
#[derive(Clone)]
pub struct DhRatchet {
    pub(crate) root_key: [u8; 32],
    pub(crate) dh_pair: X25519Secret,
    pub(crate) remote_public: Option<X25519PublicKey>,
    pub(crate) pending_sending: Option<EpochKeys>,
}

impl DhRatchet {
    /// Ratchet for the side that sends first, given the pre-shared secret and
    /// the responder's ratchet public key.
    pub fn initiator(
        shared_secret: &[u8; 32],
        remote_public: &X25519PublicKey,
    ) -> Result<Self, Error> {
        let dh_pair = X25519Secret::generate()?;
        let (root_key, sending) = Self::kdf_rk_he(shared_secret, dh_pair.dh(remote_public))?;

        Ok(Self {
            root_key,
            dh_pair,
            remote_public: Some(*remote_public),
            pending_sending: Some(sending),
        })
    }

    /// Ratchet for the side that waits for the first message.
    pub fn responder(shared_secret: &[u8; 32], dh_pair: X25519Secret) -> Self {
        Self {
            root_key: *shared_secret,
            dh_pair,
            remote_public: None,
            pending_sending: None,
        }
    }

    /// Peer's last seen ratchet public key.
    pub fn remote_public(&self) -> Option<X25519PublicKey> {
        self.remote_public
    }

    /// Derives the header keys both sides start from.
    ///
    /// Returns the initiator's first sending header key and the responder's.
    pub(crate) fn initial_header_keys(
        shared_secret: &[u8; 32],
    ) -> Result<(CipherKey, CipherKey), Error> {
        let mut seed_a = [0u8; 32];
        let mut seed_b = [0u8; 32];
        hkdf_expand(None, shared_secret, b"RatchetChain-Header-Key-A", &mut seed_a)?;
        hkdf_expand(None, shared_secret, b"RatchetChain-Next-Header-Key-B", &mut seed_b)?;

        let header_key_a = CipherKey::derive(&seed_a, HEADER_KEY_INFO);
        let header_key_b = CipherKey::derive(&seed_b, HEADER_KEY_INFO);
        seed_a.zeroize();
        seed_b.zeroize();

        Ok((header_key_a?, header_key_b?))
    }

    /// Root key KDF with header encryption.
    ///
    /// Returns the new root key and the epoch keys (chain key and next header key).
    fn kdf_rk_he(
        root_key: &[u8; 32],
        mut dh_output: SharedSecret,
    ) -> Result<([u8; 32], EpochKeys), Error> {
        let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output.as_bytes());

        let mut new_root_key = [0u8; 32];
        let mut chain_key = [0u8; 32];
        let mut header_seed = [0u8; 32];

        hkdf.expand(b"RatchetChain-Root", &mut new_root_key)?;
        hkdf.expand(b"RatchetChain-Chain", &mut chain_key)?;
        hkdf.expand(b"RatchetChain-Next-Header", &mut header_seed)?;

        dh_output.zeroize();

        let next_header_key = CipherKey::derive(&header_seed, HEADER_KEY_INFO);
        header_seed.zeroize();

        Ok((new_root_key, EpochKeys::new(chain_key, next_header_key?)))
    }
}

impl Ratchet for DhRatchet {
    fn ratchet(&mut self, ratchet_key: &X25519PublicKey) -> Result<EpochKeys, Error> {
        // Everything fallible happens before any field is touched.
        let new_pair = X25519Secret::generate()?;
        let (root_key, receiving) =
            Self::kdf_rk_he(&self.root_key, self.dh_pair.dh(ratchet_key))?;
        let (root_key, sending) = Self::kdf_rk_he(&root_key, new_pair.dh(ratchet_key))?;

        self.root_key = root_key;
        self.dh_pair = new_pair;
        self.remote_public = Some(*ratchet_key);
        self.pending_sending = Some(sending);

        Ok(receiving)
    }

    fn public_key(&self) -> X25519PublicKey {
        self.dh_pair.public_key()
    }

    fn take_sending_epoch(&mut self) -> Option<EpochKeys> {
        self.pending_sending.take()
    }
}

impl Zeroize for DhRatchet {
    fn zeroize(&mut self) {
        self.root_key.zeroize();
        self.dh_pair.zeroize();
        self.pending_sending.zeroize();
    }
}

impl Drop for DhRatchet {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for DhRatchet {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiator_and_responder_agree_on_first_epoch() {
        let shared_secret = [42u8; 32];
        let responder_pair = X25519Secret::generate().unwrap();
        let responder_public = responder_pair.public_key();

        let mut alice = DhRatchet::initiator(&shared_secret, &responder_public).unwrap();
        let mut bob = DhRatchet::responder(&shared_secret, responder_pair);

        let alice_sending = alice.take_sending_epoch().unwrap();
        let bob_receiving = bob.ratchet(&alice.public_key()).unwrap();

        assert_eq!(alice_sending.chain_key(), bob_receiving.chain_key());
        assert!(alice_sending.next_header_key().ct_eq(bob_receiving.next_header_key()));
        assert_eq!(bob.remote_public(), Some(alice.public_key()));
    }

    #[test]
    fn test_ratchet_rotates_key_pair_and_parks_sending_epoch() {
        let shared_secret = [7u8; 32];
        let responder_pair = X25519Secret::generate().unwrap();
        let alice = DhRatchet::initiator(&shared_secret, &responder_pair.public_key()).unwrap();
        let mut bob = DhRatchet::responder(&shared_secret, responder_pair);

        let before = bob.public_key();
        assert!(bob.take_sending_epoch().is_none());

        bob.ratchet(&alice.public_key()).unwrap();
        assert_ne!(bob.public_key(), before);
        assert!(bob.take_sending_epoch().is_some());
        assert!(bob.take_sending_epoch().is_none());
    }

    #[test]
    fn test_second_half_step_is_mirrored() {
        let shared_secret = [1u8; 32];
        let responder_pair = X25519Secret::generate().unwrap();
        let mut alice = DhRatchet::initiator(&shared_secret, &responder_pair.public_key()).unwrap();
        let mut bob = DhRatchet::responder(&shared_secret, responder_pair);

        bob.ratchet(&alice.public_key()).unwrap();
        let bob_sending = bob.take_sending_epoch().unwrap();
        let alice_receiving = alice.ratchet(&bob.public_key()).unwrap();

        assert_eq!(bob_sending.chain_key(), alice_receiving.chain_key());
    }

    #[test]
    fn test_initial_header_keys_differ() {
        let (a, b) = DhRatchet::initial_header_keys(&[3u8; 32]).unwrap();
        assert!(!a.ct_eq(&b));
    }
}
