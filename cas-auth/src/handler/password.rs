//! Static username/password accounts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use cas_core::{Attributes, Principal};

use super::AuthenticationHandler;
use crate::credential::Credential;
use crate::error::AuthenticationError;

/// SHA-256 digest of a password.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest([u8; 32]);

impl PasswordDigest {
    pub fn of(password: &str) -> Self {
        Self(Sha256::digest(password.as_bytes()).into())
    }

    /// Parse a lowercase or uppercase hex digest.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }

    /// Constant-time comparison against a candidate password.
    pub fn matches(&self, password: &str) -> bool {
        Self::of(password).0.ct_eq(&self.0).into()
    }
}

impl std::fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordDigest(..)")
    }
}

#[derive(Debug, Clone)]
pub struct PasswordAccount {
    pub digest: PasswordDigest,
    pub disabled: bool,
    pub attributes: Attributes,
}

impl PasswordAccount {
    pub fn new(password: &str) -> Self {
        Self {
            digest: PasswordDigest::of(password),
            disabled: false,
            attributes: Attributes::new(),
        }
    }
}

/// Accepts a fixed set of accounts. Usernames are case-sensitive.
#[derive(Debug, Default)]
pub struct AcceptUsersHandler {
    accounts: HashMap<String, PasswordAccount>,
}

impl AcceptUsersHandler {
    pub const NAME: &'static str = "accept-users";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account (builder pattern).
    pub fn with_account(mut self, username: impl Into<String>, account: PasswordAccount) -> Self {
        self.accounts.insert(username.into(), account);
        self
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AuthenticationHandler for AcceptUsersHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword { .. })
    }

    fn authenticate(
        &self,
        credential: &Credential,
        _now: DateTime<Utc>,
    ) -> Result<Principal, AuthenticationError> {
        let Credential::UsernamePassword { username, password } = credential else {
            return Err(AuthenticationError::UnsupportedCredential);
        };
        let Some(account) = self.accounts.get(username) else {
            // Hash anyway so unknown users cost the same as wrong passwords.
            let _ = PasswordDigest::of(password).matches("");
            return Err(AuthenticationError::BadCredentials);
        };
        if !account.digest.matches(password) {
            return Err(AuthenticationError::BadCredentials);
        }
        if account.disabled {
            return Err(AuthenticationError::AccountDisabled);
        }
        Ok(Principal {
            id: username.clone(),
            attributes: account.attributes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> AcceptUsersHandler {
        let mut account = PasswordAccount::new("Mellon");
        account
            .attributes
            .insert("mail".to_string(), vec!["casuser@example.org".to_string()]);
        let mut disabled = PasswordAccount::new("secret");
        disabled.disabled = true;
        AcceptUsersHandler::new()
            .with_account("casuser", account)
            .with_account("locked", disabled)
    }

    #[test]
    fn accepts_valid_password() {
        let principal = handler()
            .authenticate(&Credential::password("casuser", "Mellon"), Utc::now())
            .unwrap();
        assert_eq!(principal.id, "casuser");
        assert_eq!(principal.attributes["mail"], vec!["casuser@example.org"]);
    }

    #[test]
    fn rejects_wrong_password_and_unknown_user() {
        let handler = handler();
        assert_eq!(
            handler.authenticate(&Credential::password("casuser", "mellon"), Utc::now()),
            Err(AuthenticationError::BadCredentials)
        );
        assert_eq!(
            handler.authenticate(&Credential::password("nobody", "Mellon"), Utc::now()),
            Err(AuthenticationError::BadCredentials)
        );
        assert_eq!(
            handler.authenticate(&Credential::password("CASUSER", "Mellon"), Utc::now()),
            Err(AuthenticationError::BadCredentials)
        );
    }

    #[test]
    fn disabled_account_reported_after_password_check() {
        let handler = handler();
        assert_eq!(
            handler.authenticate(&Credential::password("locked", "secret"), Utc::now()),
            Err(AuthenticationError::AccountDisabled)
        );
        assert_eq!(
            handler.authenticate(&Credential::password("locked", "wrong"), Utc::now()),
            Err(AuthenticationError::BadCredentials)
        );
    }

    #[test]
    fn digest_from_hex() {
        // sha256("Mellon")
        let hex = format!("{:x}", Sha256::digest(b"Mellon"));
        let digest = PasswordDigest::from_hex(&hex).unwrap();
        assert!(digest.matches("Mellon"));
        assert!(PasswordDigest::from_hex("abc").is_none());
        assert!(PasswordDigest::from_hex(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn supports_only_passwords() {
        assert!(!handler().supports(&Credential::Token {
            token: "t".to_string()
        }));
    }
}
