//! Signed principal tokens.
//!
//! A token names a principal and carries its own validity window, signed
//! with the server's key. Administrators issue them with
//! `cas-server token issue`; `POST /login` accepts them in place of a
//! password.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use cas_core::Principal;

use super::AuthenticationHandler;
use crate::credential::Credential;
use crate::error::AuthenticationError;
use crate::identity::{PrivateKey, PublicKey, Signature};

/// Current wire format version.
const TOKEN_VERSION: u8 = 1;

/// Domain separation prefix for signing.
const DOMAIN_PREFIX: &[u8] = b"CAS-PRINCIPAL-TOKEN-v1:";

const HEADER_LEN: usize = 1 + 8 + 8 + 2;
const SIGNATURE_LEN: usize = 64;
const MAX_SUBJECT_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("unsupported token version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

impl From<TokenError> for AuthenticationError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::NotYetValid => AuthenticationError::ExpiredCredential,
            _ => AuthenticationError::BadCredentials,
        }
    }
}

/// A signed principal token.
///
/// Wire format (v1), URL-safe base64 without padding:
/// - 1 byte: version
/// - 8 bytes: issued-at (Unix seconds, big-endian i64)
/// - 8 bytes: expires-at (Unix seconds, big-endian i64)
/// - 2 bytes: subject length (big-endian u16)
/// - N bytes: subject (UTF-8)
/// - 64 bytes: Ed25519 signature over (DOMAIN_PREFIX || all preceding bytes)
#[derive(Debug, Clone)]
pub struct PrincipalToken {
    subject: String,
    issued_at: i64,
    expires_at: i64,
    signature: Signature,
}

impl PrincipalToken {
    /// Issue a token for `subject`, valid from `now` for `validity_secs`.
    pub fn issue(
        signing_key: &PrivateKey,
        subject: &str,
        now: DateTime<Utc>,
        validity_secs: i64,
    ) -> Result<Self, TokenError> {
        if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
            return Err(TokenError::Malformed);
        }
        let issued_at = now.timestamp();
        let expires_at = issued_at.saturating_add(validity_secs.max(1));
        let body = Self::encode_body(subject, issued_at, expires_at);
        let signature = signing_key.sign(&Self::signing_message(&body));
        Ok(Self {
            subject: subject.to_string(),
            issued_at,
            expires_at,
            signature,
        })
    }

    fn encode_body(subject: &str, issued_at: i64, expires_at: i64) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN + subject.len());
        body.push(TOKEN_VERSION);
        body.extend_from_slice(&issued_at.to_be_bytes());
        body.extend_from_slice(&expires_at.to_be_bytes());
        // Subject length is bounded by MAX_SUBJECT_LEN.
        body.extend_from_slice(&(subject.len() as u16).to_be_bytes());
        body.extend_from_slice(subject.as_bytes());
        body
    }

    fn signing_message(body: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(DOMAIN_PREFIX.len() + body.len());
        message.extend_from_slice(DOMAIN_PREFIX);
        message.extend_from_slice(body);
        message
    }

    /// Verify the signature, then the validity window.
    pub fn verify(&self, public_key: &PublicKey, now: DateTime<Utc>) -> Result<(), TokenError> {
        let body = Self::encode_body(&self.subject, self.issued_at, self.expires_at);
        if !public_key.verify(&Self::signing_message(&body), &self.signature) {
            return Err(TokenError::InvalidSignature);
        }
        let now = now.timestamp();
        if now < self.issued_at {
            return Err(TokenError::NotYetValid);
        }
        if now >= self.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn encode(&self) -> String {
        let mut bytes = Self::encode_body(&self.subject, self.issued_at, self.expires_at);
        bytes.extend_from_slice(&self.signature.to_bytes());
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| TokenError::Malformed)?;
        if bytes.len() < HEADER_LEN + SIGNATURE_LEN {
            return Err(TokenError::Malformed);
        }
        if bytes[0] != TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion(bytes[0]));
        }
        let read_i64 = |range: std::ops::Range<usize>| -> Result<i64, TokenError> {
            bytes[range]
                .try_into()
                .map(i64::from_be_bytes)
                .map_err(|_| TokenError::Malformed)
        };
        let issued_at = read_i64(1..9)?;
        let expires_at = read_i64(9..17)?;
        let subject_len = u16::from_be_bytes([bytes[17], bytes[18]]) as usize;
        if bytes.len() != HEADER_LEN + subject_len + SIGNATURE_LEN {
            return Err(TokenError::Malformed);
        }
        let subject_end = HEADER_LEN + subject_len;
        let subject = std::str::from_utf8(&bytes[HEADER_LEN..subject_end])
            .map_err(|_| TokenError::Malformed)?
            .to_string();
        let signature =
            Signature::from_bytes(&bytes[subject_end..]).map_err(|_| TokenError::Malformed)?;
        Ok(Self {
            subject,
            issued_at,
            expires_at,
            signature,
        })
    }
}

/// Accepts principal tokens signed by the server key.
#[derive(Debug)]
pub struct TokenHandler {
    public_key: PublicKey,
}

impl TokenHandler {
    pub const NAME: &'static str = "principal-token";

    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }
}

impl AuthenticationHandler for TokenHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::Token { .. })
    }

    fn authenticate(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthenticationError> {
        let Credential::Token { token } = credential else {
            return Err(AuthenticationError::UnsupportedCredential);
        };
        let token = PrincipalToken::decode(token)?;
        token.verify(&self.public_key, now)?;
        Ok(Principal::new(token.subject()))
    }
}
