use crate::chain::{ChainCoreState, ChainState, CipherKey, SkippedKeyEntry, SkippedKeyStore};
use crate::config::ChainConfig;
use crate::crypto;
use crate::envelope::{HeaderPlaintext, MessageEnvelope};
use crate::error::Error;
use crate::ratchet::Ratchet;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

/// Result of a successful header trial decryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscoveredHeader {
    /// Sender's counter for this message.
    pub count: u32,
    /// Sender's previous sending-chain length.
    pub previous: u32,
    /// Whether the header opened under the next header key, i.e. the sender
    /// started a new DH epoch.
    pub used_next: bool,
}

/// Snapshot of a receiving chain, for persistence by an external store.
#[derive(Clone, Debug)]
pub struct ReceivingChainState {
    pub core: ChainCoreState,
    pub skipped: Vec<SkippedKeyEntry>,
}

/// Which known key opened a header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HeaderKeySource {
    /// Header key of an epoch that has already been replaced.
    Retired,
    Current,
    Next,
}

/// Receiving half of a ratchet session.
///
/// Turns envelopes arriving in any order back into plaintext while keeping
/// each message key single-use. Keys for counter values that were jumped over
/// are retained in a [`SkippedKeyStore`] until used or expired.
///
/// A chain is not thread safe; at most one `decrypt` may run at a time.
pub struct ReceivingChain<R: Ratchet> {
    state: ChainState,
    skipped: SkippedKeyStore,
    ratchet: Rc<RefCell<R>>,
    config: ChainConfig,
}

impl<R: Ratchet> ReceivingChain<R> {
    /// A chain that has not seen any message yet. `next_header_key` is the
    /// header key the peer will use for its first epoch.
    pub fn new(ratchet: Rc<RefCell<R>>, next_header_key: CipherKey, config: ChainConfig) -> Self {
        Self {
            state: ChainState::pending(next_header_key),
            skipped: SkippedKeyStore::default(),
            ratchet,
            config,
        }
    }

    /// Restores a chain from a snapshot taken with [`ReceivingChain::state`].
    pub fn from_state(
        ratchet: Rc<RefCell<R>>,
        state: &ReceivingChainState,
        config: ChainConfig,
    ) -> Self {
        Self {
            state: ChainState::from_core_state(&state.core),
            skipped: SkippedKeyStore::from_entries(state.skipped.clone()),
            ratchet,
            config,
        }
    }

    /// Current position in the receiving chain.
    pub fn count(&self) -> u32 {
        self.state.count
    }

    pub fn skipped(&self) -> &SkippedKeyStore {
        &self.skipped
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Snapshot of the skipped keys and the core chain fields.
    pub fn state(&self) -> ReceivingChainState {
        ReceivingChainState {
            core: self.state.core_state(),
            skipped: self.skipped.to_entries(),
        }
    }

    /// Decrypts a serialized envelope.
    pub fn decrypt(&mut self, envelope: &[u8]) -> Result<Vec<u8>, Error> {
        let envelope = MessageEnvelope::from_bytes(envelope)?;
        self.decrypt_envelope(&envelope)
    }

    /// Decrypts an envelope, advancing the chain as needed.
    ///
    /// Errors are local: [`Error::HeaderKeyNotFound`] when no known header key
    /// applies, [`Error::Authentication`] for any tag or cipher failure. Skips
    /// and ratchet steps performed before a failed tag check are kept.
    pub fn decrypt_envelope(&mut self, envelope: &MessageEnvelope) -> Result<Vec<u8>, Error> {
        if let Some(plaintext) = self.try_skipped(envelope) {
            return Ok(plaintext);
        }

        let (header, source) = self.discover_header(&envelope.header)?;

        match source {
            HeaderKeySource::Retired => {
                // A genuine message for a retired key would have matched its
                // skipped entry above.
                debug!(count = header.count, "header from retired epoch without usable key");
                return Err(Error::Authentication);
            }
            HeaderKeySource::Next => {
                let prior = if self.state.is_active() {
                    header.previous.saturating_sub(self.state.count)
                } else {
                    0
                };
                self.check_skip_limit(prior.saturating_add(header.count))?;

                debug!(
                    previous = header.previous,
                    count = header.count,
                    "peer started a new ratchet epoch"
                );
                self.delete_old_keys();
                self.skip(prior)?;

                let keys = self
                    .ratchet
                    .try_borrow_mut()
                    .map_err(|_| Error::Session)?
                    .ratchet(&envelope.ratchet_key)?;
                self.state.begin_epoch(&keys)?;

                self.skip(header.count)?;
            }
            HeaderKeySource::Current => {
                let ahead = header.count.saturating_sub(self.state.count);
                self.check_skip_limit(ahead)?;
                self.skip(ahead)?;
            }
        }

        let message_key = self.state.message_key.clone().ok_or(Error::Session)?;

        if !Self::valid_authentication_tag(envelope, message_key.auth()) {
            debug!(count = self.state.count, "authentication tag mismatch");
            return Err(Error::Authentication);
        }

        let plaintext = crypto::open(&message_key, &envelope.ciphertext)?;
        self.state.step()?;

        trace!(count = self.state.count, "message decrypted");
        Ok(plaintext)
    }

    /// Trial-decrypts a header with every skipped header key, then the current
    /// header key, then the next header key.
    pub fn decrypt_header(&self, encrypted_header: &[u8]) -> Result<DiscoveredHeader, Error> {
        let (header, source) = self.discover_header(encrypted_header)?;

        Ok(DiscoveredHeader {
            count: header.count,
            previous: header.previous,
            used_next: source == HeaderKeySource::Next,
        })
    }

    /// A header that opens but carries negative counters was sealed by a
    /// holder of the header key, so it is an authentication failure rather
    /// than a miss.
    fn discover_header(
        &self,
        encrypted_header: &[u8],
    ) -> Result<(HeaderPlaintext, HeaderKeySource), Error> {
        let mut last_tried: Option<&CipherKey> = None;

        let candidates = self
            .skipped
            .iter()
            .map(SkippedKeyEntry::header)
            .chain(self.state.header_key.as_ref())
            .chain(std::iter::once(&self.state.next_header_key));

        for header_key in candidates {
            // Entries of one epoch share a header key; try each key once.
            if last_tried.is_some_and(|last| last.ct_eq(header_key)) {
                continue;
            }
            last_tried = Some(header_key);

            let Some(bytes) = crypto::open_header(header_key, encrypted_header) else {
                continue;
            };
            let Some(header) = HeaderPlaintext::from_bytes(bytes) else {
                debug!("header carries negative counters");
                return Err(Error::Authentication);
            };

            let source = if header_key.ct_eq(&self.state.next_header_key) {
                HeaderKeySource::Next
            } else if self
                .state
                .header_key
                .as_ref()
                .is_some_and(|current| header_key.ct_eq(current))
            {
                HeaderKeySource::Current
            } else {
                HeaderKeySource::Retired
            };

            return Ok((header, source));
        }

        debug!("no header key matched incoming message");
        Err(Error::HeaderKeyNotFound)
    }

    /// Looks for a skipped key whose MAC key verifies the tag and uses it once.
    fn try_skipped(&mut self, envelope: &MessageEnvelope) -> Option<Vec<u8>> {
        let (index, plaintext) = self.skipped.iter().enumerate().find_map(|(index, entry)| {
            if !Self::valid_authentication_tag(envelope, entry.message().auth()) {
                return None;
            }
            crypto::open(entry.message(), &envelope.ciphertext)
                .ok()
                .map(|plaintext| (index, plaintext))
        })?;

        self.skipped.take(index);
        trace!(remaining = self.skipped.len(), "message decrypted with skipped key");
        Some(plaintext)
    }

    fn valid_authentication_tag(envelope: &MessageEnvelope, auth_key: &[u8; 32]) -> bool {
        crypto::authentication_tag(&envelope.header, &envelope.ciphertext, auth_key)
            .is_ok_and(|tag| crypto::compare(&envelope.authentication_tag, &tag))
    }

    fn check_skip_limit(&self, requested: u32) -> Result<(), Error> {
        if requested > self.config.max_skip {
            debug!(requested, limit = self.config.max_skip, "refusing to skip");
            return Err(Error::TooManySkipped {
                requested,
                limit: self.config.max_skip,
            });
        }
        Ok(())
    }

    /// Retains the current key pair and steps, `n` times. Afterwards the live
    /// keys belong to counter value `count + n`.
    fn skip(&mut self, n: u32) -> Result<(), Error> {
        if n == 0 || !self.state.is_active() {
            return Ok(());
        }

        for _ in 0..n {
            let (Some(header), Some(message)) = (&self.state.header_key, &self.state.message_key)
            else {
                return Err(Error::Session);
            };
            self.skipped
                .push(SkippedKeyEntry::new(header.clone(), message.clone()));
            self.state.step()?;
        }

        let evicted = self.skipped.truncate_oldest(self.config.max_skipped_keys);
        if evicted > 0 {
            debug!(evicted, "skipped key store over capacity");
        }
        trace!(skipped = n, count = self.state.count, "skipped message keys");

        Ok(())
    }

    /// Ages skipped keys by one epoch and drops those past the ttl.
    fn delete_old_keys(&mut self) {
        let evicted = self.skipped.age(self.config.message_key_ttl);
        if evicted > 0 {
            debug!(evicted, "expired skipped message keys");
        }
    }
}
