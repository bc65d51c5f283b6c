//! Ed25519 keys used to sign principal tokens and verify delegated assertions.
//!
//! - [`PrivateKey`] - Signing key with automatic zeroization on drop
//! - [`PublicKey`] - Verification key for signature checks
//! - [`Signature`] - Ed25519 signature over a message
//! - [`Fingerprint`] - Key identifier: `SHA256:{url_safe_base64_no_padding}`
//!
//! # Security Properties
//!
//! - Private keys are zeroized on drop
//! - No `Debug` implementation for `PrivateKey` prevents accidental logging
//! - Fingerprint comparison uses constant-time equality
//! - `verify_strict` is used to reject weak/small-order keys
//!
//! # Example
//!
//! ```
//! use cas_auth::identity::{Fingerprint, PrivateKey, PublicKey};
//!
//! let private_key = PrivateKey::generate();
//! let public_key = private_key.public_key();
//!
//! // Keys travel through config files as URL-safe base64.
//! let encoded = public_key.to_base64();
//! let restored = PublicKey::from_base64(&encoded).unwrap();
//! assert_eq!(Fingerprint::from_public_key(&restored), Fingerprint::from_public_key(&public_key));
//!
//! let signature = private_key.sign(b"assertion");
//! assert!(restored.verify(b"assertion", &signature));
//! ```

mod keys;

pub use keys::{Fingerprint, KeyError, PrivateKey, PublicKey, Signature};
