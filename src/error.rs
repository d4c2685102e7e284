/// Errors that can occur while driving a ratchet chain.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// None of the known header keys opens the message header.
    ///
    /// The message may belong to an epoch whose keys have not been derived yet,
    /// so the caller may keep it around and retry later.
    #[error("No known header key decrypts the message header")]
    HeaderKeyNotFound,

    /// The authentication tag or the payload failed to verify.
    #[error("Message authentication failed")]
    Authentication,

    /// The envelope is shorter than its fixed-length fields.
    #[error("Invalid message envelope: {0}")]
    InvalidEnvelope(String),

    /// Processing the header would skip more message keys than allowed.
    #[error("Too many skipped messages: {requested} requested, limit is {limit}")]
    TooManySkipped {
        /// Number of keys the header asked the chain to skip.
        requested: u32,
        /// Configured per-message limit.
        limit: u32,
    },

    /// The sending chain cannot encode any further counter values.
    #[error("Chain counter exhausted")]
    ChainExhausted,

    /// A cryptographic operation failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// A protocol rule was violated.
    #[error("Protocol Violation: {0}")]
    Protocol(String),

    /// Session is in an invalid state.
    #[error("Session state error")]
    Session,

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),
}

impl Error {
    /// Whether the failure may go away once more key material is available.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::HeaderKeyNotFound)
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(value: hkdf::InvalidLength) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<hmac::digest::InvalidLength> for Error {
    fn from(value: hmac::digest::InvalidLength) -> Self {
        Self::Crypto(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_key_discovery_miss_is_recoverable() {
        assert!(Error::HeaderKeyNotFound.is_recoverable());
        assert!(!Error::Authentication.is_recoverable());
        assert!(!Error::InvalidEnvelope("short".to_string()).is_recoverable());
    }

    #[test]
    fn test_authentication_error_is_opaque() {
        assert_eq!(Error::Authentication.to_string(), "Message authentication failed");
    }
}
