use crate::crypto::{compare, hkdf_expand};
use crate::error::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub(crate) const CONTENT_LENGTH: usize = 32;
pub(crate) const IV_LENGTH: usize = 12;
pub(crate) const AUTH_LENGTH: usize = 32;
const MATERIAL_LENGTH: usize = CONTENT_LENGTH + IV_LENGTH + AUTH_LENGTH;

/// One symmetric key instance: cipher key, nonce and MAC key.
///
/// Immutable once built. `Clone` yields an independent copy, which is what the
/// skipped-key store captures before the chain overwrites its live keys.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey {
    content: [u8; CONTENT_LENGTH],
    iv: [u8; IV_LENGTH],
    auth: [u8; AUTH_LENGTH],
}

impl CipherKey {
    /// Expands a 32-byte seed into a full key with HKDF-SHA256.
    pub fn derive(seed: &[u8; 32], info: &[u8]) -> Result<Self, Error> {
        let mut material = [0u8; MATERIAL_LENGTH];
        hkdf_expand(None, seed, info, &mut material)?;
        let key = Self::from_material(&material);
        material.zeroize();
        Ok(key)
    }

    fn from_material(material: &[u8; MATERIAL_LENGTH]) -> Self {
        let mut content = [0u8; CONTENT_LENGTH];
        let mut iv = [0u8; IV_LENGTH];
        let mut auth = [0u8; AUTH_LENGTH];
        content.copy_from_slice(&material[..CONTENT_LENGTH]);
        iv.copy_from_slice(&material[CONTENT_LENGTH..CONTENT_LENGTH + IV_LENGTH]);
        auth.copy_from_slice(&material[CONTENT_LENGTH + IV_LENGTH..]);

        Self { content, iv, auth }
    }

    pub fn content(&self) -> &[u8; CONTENT_LENGTH] {
        &self.content
    }

    pub fn iv(&self) -> &[u8; IV_LENGTH] {
        &self.iv
    }

    pub fn auth(&self) -> &[u8; AUTH_LENGTH] {
        &self.auth
    }

    /// Constant-time equality over all three parts.
    pub fn ct_eq(&self, other: &CipherKey) -> bool {
        // Evaluate every part so the comparison time does not depend on which differs.
        let content = compare(&self.content, &other.content);
        let iv = compare(&self.iv, &other.iv);
        let auth = compare(&self.auth, &other.auth);
        content & iv & auth
    }

    pub(crate) fn to_bytes(&self) -> [u8; MATERIAL_LENGTH] {
        let mut bytes = [0u8; MATERIAL_LENGTH];
        bytes[..CONTENT_LENGTH].copy_from_slice(&self.content);
        bytes[CONTENT_LENGTH..CONTENT_LENGTH + IV_LENGTH].copy_from_slice(&self.iv);
        bytes[CONTENT_LENGTH + IV_LENGTH..].copy_from_slice(&self.auth);
        bytes
    }
}

impl TryFrom<&[u8]> for CipherKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let material = <&[u8; MATERIAL_LENGTH]>::try_from(bytes)
            .map_err(|_| Error::Serde("Invalid cipher key length".to_string()))?;
        Ok(Self::from_material(material))
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic_and_domain_separated() {
        let seed = [7u8; 32];
        let a = CipherKey::derive(&seed, b"one").unwrap();
        let b = CipherKey::derive(&seed, b"one").unwrap();
        let c = CipherKey::derive(&seed, b"two").unwrap();

        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let key = CipherKey::derive(&[3u8; 32], b"key").unwrap();
        let restored = CipherKey::try_from(key.to_bytes().as_slice()).unwrap();
        assert!(key.ct_eq(&restored));
        assert!(CipherKey::try_from(&key.to_bytes()[1..]).is_err());
    }

    #[test]
    fn test_clone_is_independent() {
        let key = CipherKey::derive(&[5u8; 32], b"key").unwrap();
        let mut copy = key.clone();
        copy.zeroize();
        assert_eq!(copy.content(), &[0u8; 32]);
        assert_ne!(key.content(), &[0u8; 32]);
    }
}
