/// Tunables for a receiving chain's skipped-key retention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    /// Number of DH ratchet epochs a skipped key survives without being used.
    pub message_key_ttl: u32,
    /// Maximum number of keys a single incoming message may cause to be skipped.
    pub max_skip: u32,
    /// Hard ceiling on retained skipped keys; the oldest are evicted first.
    pub max_skipped_keys: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            message_key_ttl: 5,
            max_skip: 1_000,
            max_skipped_keys: 2_000,
        }
    }
}
