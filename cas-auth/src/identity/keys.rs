//! Ed25519 key material with proper secret handling.
//!
//! - Private keys are zeroized on drop
//! - No Debug/Display implementations that leak secrets
//! - Fingerprints use constant-time comparison
//! - Text encoding is URL-safe base64 without padding

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The provided bytes have an invalid length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The provided bytes do not represent a valid key.
    #[error("invalid key format")]
    InvalidFormat,

    /// The text is not valid URL-safe base64.
    #[error("invalid key encoding")]
    InvalidEncoding,
}

/// A private Ed25519 signing key.
///
/// # Security
///
/// - Zeroized on drop (`SigningKey` implements `ZeroizeOnDrop`)
/// - No `Debug` implementation to prevent accidental logging
pub struct PrivateKey(ed25519_dalek::SigningKey);

impl PrivateKey {
    /// Generate a new random private key.
    #[must_use]
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Load a private key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(ed25519_dalek::SigningKey::from_bytes(&bytes)))
    }

    /// Load a private key from its base64 text form (surrounding whitespace is ignored).
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(encoded.trim())
                .map_err(|_| KeyError::InvalidEncoding)?,
        );
        Self::from_bytes(&bytes)
    }

    /// Export the key as base64 text, wrapped so the copy is zeroized on drop.
    #[must_use]
    pub fn to_base64(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.0.to_bytes());
        Zeroizing::new(URL_SAFE_NO_PAD.encode(bytes.as_slice()))
    }

    /// Sign a message with this private key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

// Explicitly NO Debug implementation for PrivateKey

/// A public Ed25519 verification key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    /// Load a public key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 32 bytes.
    /// Returns `KeyError::InvalidFormat` if the bytes don't represent a valid point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| KeyError::InvalidEncoding)?;
        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Export the raw public key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Verify a signature over a message.
    ///
    /// Uses `verify_strict` to reject weak/small-order keys.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify_strict(message, &signature.0).is_ok()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", Fingerprint::from_public_key(self))
    }
}

/// An Ed25519 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    /// Load a signature from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 64,
            actual: bytes.len(),
        })?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&bytes)))
    }

    /// Export the raw signature bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 4 bytes only
        let bytes = self.0.to_bytes();
        write!(
            f,
            "Signature({:02x}{:02x}{:02x}{:02x}...)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

/// A SHA-256 fingerprint of a public key, used to identify configured
/// keys in logs.
///
/// Comparisons use constant-time equality. Hash stays derived: the
/// fingerprint is public, only equality needs timing protection.
#[derive(Clone, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::derived_hash_with_manual_eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const PREFIX: &'static str = "SHA256:";

    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let hash = Sha256::digest(public_key.to_bytes());
        Self(format!("{}{}", Self::PREFIX, URL_SAFE_NO_PAD.encode(hash)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation_and_signing() {
        let private_key = PrivateKey::generate();
        let public_key = private_key.public_key();

        let message = b"test message";
        let signature = private_key.sign(message);

        assert!(public_key.verify(message, &signature));
    }

    #[test]
    fn test_private_key_base64_roundtrip() {
        let private_key = PrivateKey::generate();
        let encoded = private_key.to_base64();
        let restored = PrivateKey::from_base64(&format!("  {}\n", encoded.as_str())).unwrap();

        assert_eq!(
            private_key.public_key().to_bytes(),
            restored.public_key().to_bytes()
        );
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let public_key = PrivateKey::generate().public_key();
        let restored = PublicKey::from_base64(&public_key.to_base64()).unwrap();
        assert_eq!(public_key, restored);
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert_eq!(
            PublicKey::from_base64("!!!").unwrap_err(),
            KeyError::InvalidEncoding
        );
        assert!(matches!(
            PrivateKey::from_base64("YWJj"),
            Err(KeyError::InvalidLength { expected: 32, actual: 3 })
        ));
    }

    #[test]
    fn test_fingerprint_format() {
        let public_key = PrivateKey::generate().public_key();
        let fingerprint = Fingerprint::from_public_key(&public_key);

        // 7 (prefix) + 43 (base64 of 32 bytes, no padding)
        assert!(fingerprint.as_str().starts_with("SHA256:"));
        assert_eq!(fingerprint.as_str().len(), 50);
    }

    #[test]
    fn test_fingerprint_identifies_key() {
        let key1 = PrivateKey::generate().public_key();
        let key2 = PrivateKey::generate().public_key();
        let restored = PublicKey::from_base64(&key1.to_base64()).unwrap();

        assert_eq!(
            Fingerprint::from_public_key(&key1),
            Fingerprint::from_public_key(&restored)
        );
        assert_ne!(
            Fingerprint::from_public_key(&key1),
            Fingerprint::from_public_key(&key2)
        );
        assert_eq!(
            format!("{key1:?}"),
            format!("PublicKey({})", Fingerprint::from_public_key(&key1))
        );
    }

    #[test]
    fn test_signature_wrong_key_rejected() {
        let key1 = PrivateKey::generate();
        let key2 = PrivateKey::generate();

        let signature = key1.sign(b"test message");
        assert!(!key2.public_key().verify(b"test message", &signature));
    }

    #[test]
    fn test_invalid_key_lengths() {
        assert!(PrivateKey::from_bytes(&[0u8; 16]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 16]).is_err());
        assert!(Signature::from_bytes(&[0u8; 32]).is_err());

        assert!(PrivateKey::from_bytes(&[0u8; 64]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 64]).is_err());
        assert!(Signature::from_bytes(&[0u8; 128]).is_err());
    }

    #[test]
    fn test_signature_verification_rejects_weak_keys() {
        // The identity point may parse, but verify_strict must reject it.
        if let Ok(weak_key) = PublicKey::from_bytes(&[0u8; 32]) {
            let dummy_sig = Signature::from_bytes(&[0u8; 64]).unwrap();
            assert!(!weak_key.verify(b"test message", &dummy_sig));
        }
    }
}
