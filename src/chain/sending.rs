use crate::chain::{ChainCoreState, ChainState, CipherKey};
use crate::crypto;
use crate::envelope::{HeaderPlaintext, MessageEnvelope};
use crate::error::Error;
use crate::ratchet::Ratchet;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

/// Sending half of a ratchet session.
///
/// Produces envelopes a [`ReceivingChain`](crate::ReceivingChain) on the other
/// side can open, adopting a new epoch whenever the shared ratchet has one.
pub struct SendingChain<R: Ratchet> {
    state: ChainState,
    pub(crate) previous: u32,
    ratchet: Rc<RefCell<R>>,
}

impl<R: Ratchet> SendingChain<R> {
    /// A chain whose first epoch will use `next_header_key` for its headers.
    pub fn new(ratchet: Rc<RefCell<R>>, next_header_key: CipherKey) -> Self {
        Self {
            state: ChainState::pending(next_header_key),
            previous: 0,
            ratchet,
        }
    }

    pub(crate) fn from_parts(
        ratchet: Rc<RefCell<R>>,
        core: &ChainCoreState,
        previous: u32,
    ) -> Self {
        Self {
            state: ChainState::from_core_state(core),
            previous,
            ratchet,
        }
    }

    /// Number of messages sent in the current epoch.
    pub fn count(&self) -> u32 {
        self.state.count
    }

    /// Core chain snapshot.
    pub fn core_state(&self) -> ChainCoreState {
        self.state.core_state()
    }

    /// Encrypts `plaintext` into a serialized envelope.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.encrypt_envelope(plaintext)?.to_bytes())
    }

    /// Encrypts `plaintext`, consuming the current message key.
    pub fn encrypt_envelope(&mut self, plaintext: &[u8]) -> Result<MessageEnvelope, Error> {
        let (epoch, ratchet_key) = {
            let mut ratchet = self.ratchet.try_borrow_mut().map_err(|_| Error::Session)?;
            (ratchet.take_sending_epoch(), ratchet.public_key())
        };

        if let Some(keys) = epoch {
            self.previous = if self.state.is_active() {
                self.state.count
            } else {
                0
            };
            self.state.begin_epoch(&keys)?;
            debug!(previous = self.previous, "sending chain entered a new epoch");
        }

        let (Some(header_key), Some(message_key)) =
            (&self.state.header_key, &self.state.message_key)
        else {
            return Err(Error::Protocol("No sending chain available".to_string()));
        };

        let header = HeaderPlaintext {
            count: self.state.count,
            previous: self.previous,
        }
        .to_bytes()?;

        let encrypted_header = crypto::seal_header(header_key, &header)?;
        let ciphertext = crypto::seal(message_key, plaintext)?;
        let authentication_tag =
            crypto::authentication_tag(&encrypted_header, &ciphertext, message_key.auth())?;

        self.state.step()?;
        trace!(count = self.state.count, "message encrypted");

        Ok(MessageEnvelope {
            header: encrypted_header,
            ratchet_key,
            authentication_tag,
            ciphertext,
        })
    }
}
