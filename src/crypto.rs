use crate::chain::CipherKey;
use crate::envelope::{AUTHENTICATION_TAG_LENGTH, HEADER_LENGTH, HEADER_NONCE_LENGTH};
use crate::error::Error;
use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn cipher_for(key: &CipherKey) -> Aes256GcmSiv {
    Aes256GcmSiv::new(aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key.content()))
}

/// Encrypts a payload with a message key. The key's own IV is the nonce, so a
/// message key must never seal two different payloads.
pub(crate) fn seal(key: &CipherKey, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    cipher_for(key)
        .encrypt(Nonce::from_slice(key.iv()), plaintext)
        .map_err(|_| Error::Crypto("Message encryption failed".to_string()))
}

/// Decrypts a payload with a message key.
pub(crate) fn open(key: &CipherKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    cipher_for(key)
        .decrypt(Nonce::from_slice(key.iv()), ciphertext)
        .map_err(|_| Error::Authentication)
}

/// Encrypts a 4-byte header plaintext under a header key.
///
/// Header keys live for a whole epoch, so each header gets a fresh random nonce
/// which is prepended to the output.
pub(crate) fn seal_header(key: &CipherKey, header: &[u8; 4]) -> Result<[u8; HEADER_LENGTH], Error> {
    let mut nonce = [0u8; HEADER_NONCE_LENGTH];
    OsRng.try_fill_bytes(&mut nonce).map_err(|_| Error::Random)?;

    let ciphertext = cipher_for(key)
        .encrypt(Nonce::from_slice(&nonce), header.as_slice())
        .map_err(|_| Error::Crypto("Header encryption failed".to_string()))?;

    if ciphertext.len() != HEADER_LENGTH - HEADER_NONCE_LENGTH {
        return Err(Error::Crypto("Unexpected header ciphertext length".to_string()));
    }

    let mut out = [0u8; HEADER_LENGTH];
    out[..HEADER_NONCE_LENGTH].copy_from_slice(&nonce);
    out[HEADER_NONCE_LENGTH..].copy_from_slice(&ciphertext);
    Ok(out)
}

/// Attempts to open an encrypted header. `None` means the key is not the one
/// the header was sealed with (or the header was tampered with).
pub(crate) fn open_header(key: &CipherKey, encrypted_header: &[u8]) -> Option<[u8; 4]> {
    if encrypted_header.len() != HEADER_LENGTH {
        return None;
    }

    let (nonce, ciphertext) = encrypted_header.split_at(HEADER_NONCE_LENGTH);
    let plaintext = cipher_for(key)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .ok()?;

    <[u8; 4]>::try_from(plaintext.as_slice()).ok()
}

/// HMAC-SHA256 over `header_ciphertext || ciphertext`.
pub(crate) fn authentication_tag(
    header_ciphertext: &[u8],
    ciphertext: &[u8],
    auth_key: &[u8; 32],
) -> Result<[u8; AUTHENTICATION_TAG_LENGTH], Error> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(auth_key)?;
    mac.update(header_ciphertext);
    mac.update(ciphertext);

    let mut tag = [0u8; AUTHENTICATION_TAG_LENGTH];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Constant-time byte comparison.
pub(crate) fn compare(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// HKDF-SHA256 expansion into `out`.
pub(crate) fn hkdf_expand(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    Hkdf::<Sha256>::new(salt, ikm).expand(info, out)?;
    Ok(())
}

/// Keyed chain step, `HMAC-SHA256(key, [label])`.
pub(crate) fn hmac_label(key: &[u8; 32], label: u8) -> Result<[u8; 32], Error> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)?;
    mac.update(&[label]);

    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> CipherKey {
        CipherKey::derive(&[seed; 32], b"test").unwrap()
    }

    #[test]
    fn test_header_roundtrip() {
        let hk = key(1);
        let sealed = seal_header(&hk, &[1, 0, 2, 0]).unwrap();
        assert_eq!(open_header(&hk, &sealed), Some([1, 0, 2, 0]));
    }

    #[test]
    fn test_header_wrong_key_fails() {
        let sealed = seal_header(&key(1), &[1, 0, 2, 0]).unwrap();
        assert_eq!(open_header(&key(2), &sealed), None);
    }

    #[test]
    fn test_header_wrong_length_fails() {
        let hk = key(1);
        let sealed = seal_header(&hk, &[1, 0, 2, 0]).unwrap();
        assert_eq!(open_header(&hk, &sealed[1..]), None);
    }

    #[test]
    fn test_payload_wrong_key_is_authentication_error() {
        let ciphertext = seal(&key(3), b"payload").unwrap();
        assert_eq!(open(&key(4), &ciphertext), Err(Error::Authentication));
        assert_eq!(open(&key(3), &ciphertext).unwrap(), b"payload");
    }

    #[test]
    fn test_tag_depends_on_every_input() {
        let auth = [9u8; 32];
        let tag = authentication_tag(b"header", b"body", &auth).unwrap();
        assert_ne!(tag, authentication_tag(b"headex", b"body", &auth).unwrap());
        assert_ne!(tag, authentication_tag(b"header", b"bodx", &auth).unwrap());
        assert_ne!(tag, authentication_tag(b"header", b"body", &[8u8; 32]).unwrap());
    }

    #[test]
    fn test_compare() {
        assert!(compare(b"abc", b"abc"));
        assert!(!compare(b"abc", b"abd"));
        assert!(!compare(b"abc", b"abcd"));
    }
}
