//! Credentials presented at login.

use std::fmt;

use cas_core::CredentialKind;
use zeroize::Zeroizing;

/// A credential submitted for primary authentication.
pub enum Credential {
    UsernamePassword {
        username: String,
        password: Zeroizing<String>,
    },
    /// A principal token signed by this server.
    Token { token: String },
    /// An assertion signed by a trusted external identity provider.
    DelegatedAssertion { issuer: String, assertion: String },
}

impl Credential {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UsernamePassword {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::UsernamePassword { .. } => CredentialKind::Password,
            Self::Token { .. } => CredentialKind::Token,
            Self::DelegatedAssertion { .. } => CredentialKind::DelegatedAssertion,
        }
    }

    /// Identifier used for throttling and events. Never contains a secret.
    pub fn id(&self) -> &str {
        match self {
            Self::UsernamePassword { username, .. } => username,
            Self::Token { .. } => "token",
            Self::DelegatedAssertion { issuer, .. } => issuer,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
            Self::DelegatedAssertion { issuer, .. } => f
                .debug_struct("DelegatedAssertion")
                .field("issuer", issuer)
                .finish_non_exhaustive(),
        }
    }
}

/// Where an authentication attempt came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: None,
        }
    }
}
