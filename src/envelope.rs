use crate::{Error, X25519PublicKey};

/// Random nonce prepended to every encrypted header.
pub const HEADER_NONCE_LENGTH: usize = 12;
/// Encrypted header: nonce, 4 plaintext bytes and the 16-byte AEAD tag.
pub const HEADER_LENGTH: usize = HEADER_NONCE_LENGTH + 4 + 16;
/// Raw X25519 public key of the sender's current ratchet key pair.
pub const RATCHET_KEY_LENGTH: usize = 32;
/// HMAC-SHA256 over the encrypted header and the ciphertext.
pub const AUTHENTICATION_TAG_LENGTH: usize = 32;
/// Shortest byte string that can hold an envelope.
pub const MIN_ENVELOPE_LENGTH: usize =
    HEADER_LENGTH + RATCHET_KEY_LENGTH + AUTHENTICATION_TAG_LENGTH;
/// Largest counter value that fits the signed 16-bit header fields.
pub const MAX_COUNTER: u32 = i16::MAX as u32;

/// Decrypted header contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderPlaintext {
    /// Sender's position in its sending chain for this message.
    pub count: u32,
    /// Length of the sender's previous sending chain.
    pub previous: u32,
}

impl HeaderPlaintext {
    pub(crate) fn to_bytes(self) -> Result<[u8; 4], Error> {
        let count = i16::try_from(self.count).map_err(|_| Error::ChainExhausted)?;
        let previous = i16::try_from(self.previous).map_err(|_| Error::ChainExhausted)?;

        let mut bytes = [0u8; 4];
        bytes[0..2].copy_from_slice(&count.to_le_bytes());
        bytes[2..4].copy_from_slice(&previous.to_le_bytes());
        Ok(bytes)
    }

    /// Negative counters never come out of a well-behaved sender.
    pub(crate) fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        let count = i16::from_le_bytes([bytes[0], bytes[1]]);
        let previous = i16::from_le_bytes([bytes[2], bytes[3]]);

        Some(Self {
            count: u32::try_from(count).ok()?,
            previous: u32::try_from(previous).ok()?,
        })
    }
}

/// An encrypted message as carried on the wire.
///
/// Format: `[encrypted header][ratchet key][authentication tag][ciphertext]`,
/// where only the ciphertext has variable length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Header sealed under the sender's epoch header key.
    pub header: [u8; HEADER_LENGTH],
    /// Sender's current ratchet public key.
    pub ratchet_key: X25519PublicKey,
    /// MAC over `header || ciphertext`.
    pub authentication_tag: [u8; AUTHENTICATION_TAG_LENGTH],
    /// Encrypted payload.
    pub ciphertext: Vec<u8>,
}

impl MessageEnvelope {
    /// Serializes the envelope for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(MIN_ENVELOPE_LENGTH + self.ciphertext.len());
        result.extend_from_slice(&self.header);
        result.extend_from_slice(self.ratchet_key.as_bytes());
        result.extend_from_slice(&self.authentication_tag);
        result.extend_from_slice(&self.ciphertext);

        result
    }

    /// Splits a byte string into its fixed-length fields and the ciphertext tail.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < MIN_ENVELOPE_LENGTH {
            return Err(Error::InvalidEnvelope(format!(
                "{} bytes, at least {MIN_ENVELOPE_LENGTH} required",
                bytes.len()
            )));
        }

        let (header, rest) = bytes.split_at(HEADER_LENGTH);
        let (ratchet_key, rest) = rest.split_at(RATCHET_KEY_LENGTH);
        let (authentication_tag, ciphertext) = rest.split_at(AUTHENTICATION_TAG_LENGTH);

        let header = <[u8; HEADER_LENGTH]>::try_from(header)
            .map_err(|_| Error::InvalidEnvelope("header".to_string()))?;
        let ratchet_key = <[u8; RATCHET_KEY_LENGTH]>::try_from(ratchet_key)
            .map_err(|_| Error::InvalidEnvelope("ratchet key".to_string()))?;
        let authentication_tag = <[u8; AUTHENTICATION_TAG_LENGTH]>::try_from(authentication_tag)
            .map_err(|_| Error::InvalidEnvelope("authentication tag".to_string()))?;

        Ok(Self {
            header,
            ratchet_key: X25519PublicKey::from(ratchet_key),
            authentication_tag,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn envelope(ciphertext_len: usize) -> MessageEnvelope {
        MessageEnvelope {
            header: [1u8; HEADER_LENGTH],
            ratchet_key: X25519PublicKey::from([2u8; RATCHET_KEY_LENGTH]),
            authentication_tag: [3u8; AUTHENTICATION_TAG_LENGTH],
            ciphertext: vec![4u8; ciphertext_len],
        }
    }

    #[test]
    fn test_envelope_roundtrip() {
        for len in [0, 1, 16, 1024] {
            let original = envelope(len);
            let bytes = original.to_bytes();
            assert_eq!(bytes.len(), MIN_ENVELOPE_LENGTH + len);
            assert_eq!(MessageEnvelope::from_bytes(&bytes).unwrap(), original);
        }
    }

    #[test]
    fn test_field_offsets() {
        let bytes = envelope(5).to_bytes();
        assert_eq!(&bytes[..HEADER_LENGTH], &[1u8; HEADER_LENGTH]);
        assert_eq!(bytes[HEADER_LENGTH], 2);
        assert_eq!(bytes[HEADER_LENGTH + RATCHET_KEY_LENGTH], 3);
        assert_eq!(&bytes[MIN_ENVELOPE_LENGTH..], &[4u8; 5]);
    }

    #[test]
    fn test_short_envelope_rejected() {
        let bytes = envelope(0).to_bytes();
        assert_matches!(
            MessageEnvelope::from_bytes(&bytes[..MIN_ENVELOPE_LENGTH - 1]),
            Err(Error::InvalidEnvelope(_))
        );
        assert_matches!(MessageEnvelope::from_bytes(&[]), Err(Error::InvalidEnvelope(_)));
    }

    #[test]
    fn test_header_encoding_is_signed_little_endian() {
        let header = HeaderPlaintext {
            count: 0x0102,
            previous: 7,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes, [0x02, 0x01, 7, 0]);
        assert_eq!(HeaderPlaintext::from_bytes(bytes), Some(header));
    }

    #[test]
    fn test_header_rejects_out_of_range_counters() {
        let header = HeaderPlaintext {
            count: MAX_COUNTER + 1,
            previous: 0,
        };
        assert_eq!(header.to_bytes(), Err(Error::ChainExhausted));
        assert_eq!(HeaderPlaintext::from_bytes([0xff, 0xff, 0, 0]), None);
    }
}
