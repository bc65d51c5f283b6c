//! Assertions from trusted external identity providers.
//!
//! An assertion is `base64url(claims JSON) "." base64url(signature)`, where
//! the signature covers `DOMAIN_PREFIX || claims JSON` and is made with the
//! issuer's Ed25519 key. The handler checks, in order: the issuer is trusted,
//! the signature, issuer and audience claims, the validity window, and that
//! the assertion id has not been seen before.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cas_core::{Attributes, Principal};

use super::AuthenticationHandler;
use crate::credential::Credential;
use crate::error::AuthenticationError;
use crate::identity::{PrivateKey, PublicKey, Signature};
use crate::replay_cache::ReplayCache;

const DOMAIN_PREFIX: &[u8] = b"CAS-DELEGATED-ASSERTION-v1:";

/// Tolerated clock difference with issuers, in seconds.
pub const ASSERTION_MAX_SKEW_SECS: i64 = 60;

/// Resolves an issuer name to its verification key.
pub trait TrustedIssuers: Send + Sync {
    fn public_key(&self, issuer: &str) -> Option<PublicKey>;
}

impl TrustedIssuers for HashMap<String, PublicKey> {
    fn public_key(&self, issuer: &str) -> Option<PublicKey> {
        self.get(issuer).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    /// Unique assertion id, used for replay detection.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub attributes: Attributes,
}

/// An encoded, signed assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAssertion(String);

impl SignedAssertion {
    /// Sign claims with an issuer key. Used by identity providers and tests.
    pub fn sign(key: &PrivateKey, claims: &AssertionClaims) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(claims)?;
        let signature = key.sign(&signing_message(&payload));
        Ok(Self(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Verify the signature and return the claims. Claims are not checked.
    pub fn verify(encoded: &str, key: &PublicKey) -> Option<AssertionClaims> {
        let (payload, signature) = encoded.trim().split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let signature = Signature::from_bytes(&signature).ok()?;
        if !key.verify(&signing_message(&payload), &signature) {
            return None;
        }
        serde_json::from_slice(&payload).ok()
    }
}

fn signing_message(payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_PREFIX.len() + payload.len());
    message.extend_from_slice(DOMAIN_PREFIX);
    message.extend_from_slice(payload);
    message
}

pub struct DelegatedAssertionHandler {
    issuers: Box<dyn TrustedIssuers>,
    replay_cache: Box<dyn ReplayCache>,
    audience: String,
}

impl DelegatedAssertionHandler {
    pub const NAME: &'static str = "delegated-assertion";

    /// `audience` is this server's name; assertions for anyone else are rejected.
    pub fn new(
        issuers: impl TrustedIssuers + 'static,
        replay_cache: impl ReplayCache + 'static,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            issuers: Box::new(issuers),
            replay_cache: Box::new(replay_cache),
            audience: audience.into(),
        }
    }
}

impl AuthenticationHandler for DelegatedAssertionHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::DelegatedAssertion { .. })
    }

    fn authenticate(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthenticationError> {
        let Credential::DelegatedAssertion { issuer, assertion } = credential else {
            return Err(AuthenticationError::UnsupportedCredential);
        };
        let key = self
            .issuers
            .public_key(issuer)
            .ok_or(AuthenticationError::BadCredentials)?;
        let claims =
            SignedAssertion::verify(assertion, &key).ok_or(AuthenticationError::BadCredentials)?;
        if claims.iss != *issuer || claims.aud != self.audience || claims.sub.is_empty() {
            return Err(AuthenticationError::BadCredentials);
        }

        let now = now.timestamp();
        if claims.iat > now.saturating_add(ASSERTION_MAX_SKEW_SECS) {
            return Err(AuthenticationError::BadCredentials);
        }
        if now >= claims.exp {
            return Err(AuthenticationError::ExpiredCredential);
        }

        // Record only after every other check passed.
        if !self
            .replay_cache
            .check_and_insert(&claims.iss, &claims.jti, claims.exp)
        {
            return Err(AuthenticationError::BadCredentials);
        }

        Ok(Principal {
            id: claims.sub,
            attributes: claims.attributes,
        })
    }
}
