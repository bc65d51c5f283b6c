//! Runs credentials through the configured handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use cas_core::Authentication;

use crate::credential::{ClientInfo, Credential};
use crate::error::AuthenticationError;
use crate::handler::AuthenticationHandler;
use crate::throttle::{FailureThrottle, ThrottleKey};

/// Picks the first handler that supports a credential and applies the
/// failure throttle around it.
pub struct AuthenticationEngine {
    handlers: Vec<Box<dyn AuthenticationHandler>>,
    throttle: Arc<FailureThrottle>,
}

impl AuthenticationEngine {
    pub fn new(throttle: Arc<FailureThrottle>) -> Self {
        Self {
            handlers: Vec::new(),
            throttle,
        }
    }

    /// Register a handler (builder pattern). Earlier handlers win.
    pub fn with_handler(mut self, handler: impl AuthenticationHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn throttle(&self) -> &FailureThrottle {
        &self.throttle
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn authenticate(
        &self,
        credential: &Credential,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<Authentication, AuthenticationError> {
        let key = ThrottleKey::new(credential.id(), client.ip.as_deref());
        if self.throttle.is_throttled(&key, now) {
            return Err(AuthenticationError::ThrottledTooManyAttempts);
        }

        let handler = self
            .handlers
            .iter()
            .find(|h| h.supports(credential))
            .ok_or(AuthenticationError::UnsupportedCredential)?;

        match handler.authenticate(credential, now) {
            Ok(principal) => {
                self.throttle.clear(&key);
                Ok(Authentication::new(
                    principal,
                    now,
                    credential.kind(),
                    handler.name(),
                ))
            }
            Err(err) => {
                if err.counts_as_failure() {
                    self.throttle.record_failure(key, now);
                }
                Err(err)
            }
        }
    }
}
