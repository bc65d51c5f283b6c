//! Authentication handlers, one per credential kind.

mod delegated;
mod password;
mod token;

use chrono::{DateTime, Utc};

use cas_core::Principal;

use crate::credential::Credential;
use crate::error::AuthenticationError;

pub use delegated::{
    AssertionClaims, DelegatedAssertionHandler, SignedAssertion, TrustedIssuers,
    ASSERTION_MAX_SKEW_SECS,
};
pub use password::{AcceptUsersHandler, PasswordAccount, PasswordDigest};
pub use token::{PrincipalToken, TokenError, TokenHandler};

/// Validates one kind of credential.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine is shared across requests.
pub trait AuthenticationHandler: Send + Sync {
    /// Name recorded in `successfulAuthenticationHandlers`.
    fn name(&self) -> &str;

    fn supports(&self, credential: &Credential) -> bool;

    /// Resolve the credential to a principal.
    fn authenticate(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthenticationError>;
}
