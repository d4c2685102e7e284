use crate::{
    ChainConfig, DhRatchet, Error, Ratchet, ReceivingChain, SendingChain, X25519PublicKey,
    X25519Secret,
};
use std::cell::RefCell;
use std::rc::Rc;

/// A secure messaging session between two parties.
///
/// Bundles one DH ratchet with the sending and receiving chains that share it.
/// The pre-shared secret comes from whatever handshake set the session up.
pub struct Session {
    pub(crate) ratchet: Rc<RefCell<DhRatchet>>,
    pub(crate) sending: SendingChain<DhRatchet>,
    pub(crate) receiving: ReceivingChain<DhRatchet>,
}

impl Session {
    /// Session for the side that sends the first message.
    pub fn initiator(
        shared_secret: &[u8; 32],
        remote_public: &X25519PublicKey,
        config: ChainConfig,
    ) -> Result<Self, Error> {
        let (header_key_a, header_key_b) = DhRatchet::initial_header_keys(shared_secret)?;
        let ratchet = Rc::new(RefCell::new(DhRatchet::initiator(
            shared_secret,
            remote_public,
        )?));

        Ok(Self {
            sending: SendingChain::new(Rc::clone(&ratchet), header_key_a),
            receiving: ReceivingChain::new(Rc::clone(&ratchet), header_key_b, config),
            ratchet,
        })
    }

    /// Session for the side that waits for the first message.
    pub fn responder(
        shared_secret: &[u8; 32],
        dh_pair: X25519Secret,
        config: ChainConfig,
    ) -> Result<Self, Error> {
        let (header_key_a, header_key_b) = DhRatchet::initial_header_keys(shared_secret)?;
        let ratchet = Rc::new(RefCell::new(DhRatchet::responder(shared_secret, dh_pair)));

        Ok(Self {
            sending: SendingChain::new(Rc::clone(&ratchet), header_key_b),
            receiving: ReceivingChain::new(Rc::clone(&ratchet), header_key_a, config),
            ratchet,
        })
    }

    /// Encrypts a message using this session.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.sending.encrypt(plaintext)
    }

    /// Decrypts a message using this session.
    pub fn decrypt(&mut self, envelope: &[u8]) -> Result<Vec<u8>, Error> {
        self.receiving.decrypt(envelope)
    }

    /// Our current ratchet public key.
    pub fn public_key(&self) -> Result<X25519PublicKey, Error> {
        let ratchet = self.ratchet.try_borrow().map_err(|_| Error::Session)?;
        Ok(ratchet.public_key())
    }

    pub fn sending_chain(&self) -> &SendingChain<DhRatchet> {
        &self.sending
    }

    pub fn receiving_chain(&self) -> &ReceivingChain<DhRatchet> {
        &self.receiving
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn create_sessions() -> (Session, Session) {
        let shared_secret = [11u8; 32];
        let bob_pair = X25519Secret::generate().unwrap();
        let bob_public = bob_pair.public_key();

        let alice =
            Session::initiator(&shared_secret, &bob_public, ChainConfig::default()).unwrap();
        let bob = Session::responder(&shared_secret, bob_pair, ChainConfig::default()).unwrap();
        (alice, bob)
    }

    #[test]
    fn test_basic_communication() {
        let (mut alice, mut bob) = create_sessions();

        let envelope = alice.encrypt(b"Hello, Bob!").unwrap();
        assert_eq!(bob.decrypt(&envelope).unwrap(), b"Hello, Bob!");

        let response = bob.encrypt(b"Hello, Alice!").unwrap();
        assert_eq!(alice.decrypt(&response).unwrap(), b"Hello, Alice!");
    }

    #[test]
    fn test_responder_cannot_send_first() {
        let (_alice, mut bob) = create_sessions();
        assert_matches!(bob.encrypt(b"too early"), Err(Error::Protocol(_)));
    }

    #[test]
    fn test_key_rotation() {
        let (mut alice, mut bob) = create_sessions();

        let envelope = alice.encrypt(b"Hello, Bob!").unwrap();
        bob.decrypt(&envelope).unwrap();
        let alice_initial_public = alice.public_key().unwrap();

        for i in 0..5 {
            let bob_msg = format!("Message from Bob {i}");
            let envelope = bob.encrypt(bob_msg.as_bytes()).unwrap();
            assert_eq!(alice.decrypt(&envelope).unwrap(), bob_msg.as_bytes());

            let alice_msg = format!("Message from Alice {i}");
            let envelope = alice.encrypt(alice_msg.as_bytes()).unwrap();
            assert_eq!(bob.decrypt(&envelope).unwrap(), alice_msg.as_bytes());
        }

        assert_ne!(
            alice_initial_public,
            alice.public_key().unwrap(),
            "DH keys should have rotated during the conversation"
        );
    }

    #[test]
    fn test_large_and_empty_messages() {
        let (mut alice, mut bob) = create_sessions();

        let large_message = vec![b'A'; 100 * 1024];
        let envelope = alice.encrypt(&large_message).unwrap();
        assert_eq!(bob.decrypt(&envelope).unwrap(), large_message);

        let envelope = alice.encrypt(b"").unwrap();
        assert_eq!(bob.decrypt(&envelope).unwrap(), b"");
    }
}
