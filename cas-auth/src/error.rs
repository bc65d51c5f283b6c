//! Authentication error types.

/// Why a credential was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthenticationError {
    /// Unknown account, wrong password, bad signature or replayed assertion.
    #[error("bad credentials")]
    BadCredentials,

    /// The account exists but is disabled.
    #[error("account disabled")]
    AccountDisabled,

    /// Too many recent failures for this username and client.
    #[error("too many failed attempts")]
    ThrottledTooManyAttempts,

    /// No configured handler accepts this kind of credential.
    #[error("unsupported credential")]
    UnsupportedCredential,

    /// A token or assertion is past its validity window.
    #[error("credential expired")]
    ExpiredCredential,
}

impl AuthenticationError {
    /// Failures that count against the throttle.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::BadCredentials | Self::AccountDisabled | Self::ExpiredCredential
        )
    }
}
