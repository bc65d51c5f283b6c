//! Pure authentication library for the CAS server.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! Dependencies are injected via traits:
//! - [`handler::AuthenticationHandler`] - One per credential kind
//! - [`handler::TrustedIssuers`] - Keys of external identity providers
//! - [`replay_cache::ReplayCache`] - Assertion replay detection
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use cas_auth::{
//!     AcceptUsersHandler, AuthenticationEngine, ClientInfo, Credential, FailureThrottle,
//!     PasswordAccount,
//! };
//!
//! let engine = AuthenticationEngine::new(Arc::new(FailureThrottle::new(
//!     5,
//!     chrono::Duration::minutes(5),
//! )))
//! .with_handler(AcceptUsersHandler::new().with_account("casuser", PasswordAccount::new("Mellon")));
//!
//! let auth = engine
//!     .authenticate(
//!         &Credential::password("casuser", "Mellon"),
//!         &ClientInfo::from_ip("127.0.0.1"),
//!         chrono::Utc::now(),
//!     )
//!     .unwrap();
//! assert_eq!(auth.principal.id, "casuser");
//! ```

pub mod credential;
pub mod engine;
pub mod error;
pub mod handler;
pub mod identity;
pub mod replay_cache;
pub mod throttle;

pub use credential::{ClientInfo, Credential};
pub use engine::AuthenticationEngine;
pub use error::AuthenticationError;
pub use handler::{
    AcceptUsersHandler, AssertionClaims, AuthenticationHandler, DelegatedAssertionHandler,
    PasswordAccount, PasswordDigest, PrincipalToken, SignedAssertion, TokenError, TokenHandler,
    TrustedIssuers,
};
pub use identity::{Fingerprint, KeyError, PrivateKey, PublicKey, Signature};
pub use replay_cache::{LruReplayCache, ReplayCache};
pub use throttle::{FailureThrottle, ThrottleKey};
