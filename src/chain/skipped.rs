use crate::chain::CipherKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key pair retained for a counter value whose message has not arrived yet.
#[derive(Clone, Debug, Zeroize, ZeroizeOnDrop)]
pub struct SkippedKeyEntry {
    pub(crate) header: CipherKey,
    pub(crate) message: CipherKey,
    pub(crate) missed: u32,
}

impl SkippedKeyEntry {
    pub(crate) fn new(header: CipherKey, message: CipherKey) -> Self {
        Self {
            header,
            message,
            missed: 0,
        }
    }

    pub fn header(&self) -> &CipherKey {
        &self.header
    }

    pub fn message(&self) -> &CipherKey {
        &self.message
    }

    /// Number of DH ratchet epochs this entry has survived unused.
    pub fn missed(&self) -> u32 {
        self.missed
    }
}

/// Insertion-ordered collection of skipped keys.
#[derive(Clone, Debug, Default)]
pub struct SkippedKeyStore {
    entries: Vec<SkippedKeyEntry>,
}

impl SkippedKeyStore {
    pub(crate) fn from_entries(entries: Vec<SkippedKeyEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkippedKeyEntry> {
        self.entries.iter()
    }

    pub(crate) fn push(&mut self, entry: SkippedKeyEntry) {
        self.entries.push(entry);
    }

    /// Removes and returns the entry at `index`; it can never be used again.
    pub(crate) fn take(&mut self, index: usize) -> Option<SkippedKeyEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// Ages every entry by one epoch and drops those older than `ttl`.
    ///
    /// Returns the number of evicted entries.
    pub(crate) fn age(&mut self, ttl: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain_mut(|entry| {
            entry.missed = entry.missed.saturating_add(1);
            entry.missed <= ttl
        });
        before - self.entries.len()
    }

    /// Drops the oldest entries until at most `capacity` remain.
    ///
    /// Returns the number of evicted entries.
    pub(crate) fn truncate_oldest(&mut self, capacity: usize) -> usize {
        let excess = self.entries.len().saturating_sub(capacity);
        self.entries.drain(..excess);
        excess
    }

    pub(crate) fn to_entries(&self) -> Vec<SkippedKeyEntry> {
        self.entries.clone()
    }
}
