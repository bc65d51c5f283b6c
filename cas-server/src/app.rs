//! Wiring: from configuration and injected dependencies to a router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use cas_auth::{
    AuthenticationEngine, DelegatedAssertionHandler, FailureThrottle, Fingerprint, LruReplayCache,
    PublicKey, TokenHandler,
};
use cas_core::Clock;

use crate::cas::CentralAuthenticationService;
use crate::cleaner::RegistryCleaner;
use crate::config::{CasConfig, ConfigError};
use crate::events::EventLog;
use crate::http::{self, AppState, CookieSettings};
use crate::proxy_callback::ProxyCallback;
use crate::services::LoginRateLimiter;
use crate::sessions::SessionRegistry;
use crate::store::TicketStore;
use crate::tickets::TicketFactory;

/// Assertion ids are remembered at least this long.
const REPLAY_WINDOW: Duration = Duration::from_secs(600);
const REPLAY_CAPACITY: usize = 100_000;

pub struct CasApp {
    cas: Arc<CentralAuthenticationService>,
    state: AppState,
    limiter: LoginRateLimiter,
    replay_cache: Arc<LruReplayCache>,
    prefix: String,
    cleaner_interval: Duration,
}

impl CasApp {
    /// `token_key` enables principal-token logins.
    pub fn new(
        config: &CasConfig,
        node_id: &str,
        store: Arc<dyn TicketStore>,
        token_key: Option<PublicKey>,
        proxy_callback: Arc<dyn ProxyCallback>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let throttle = Arc::new(FailureThrottle::new(
            config.throttle.threshold,
            config.throttle.window(),
        ));
        let replay_cache = Arc::new(LruReplayCache::new(REPLAY_WINDOW, REPLAY_CAPACITY));

        let mut engine = AuthenticationEngine::new(throttle).with_handler(config.password_handler()?);
        if let Some(key) = token_key {
            tracing::info!(key = %Fingerprint::from_public_key(&key), "Principal tokens enabled");
            engine = engine.with_handler(TokenHandler::new(key));
        }
        let issuers = config.issuer_keys()?;
        for (issuer, key) in &issuers {
            tracing::info!(
                issuer = %issuer,
                key = %Fingerprint::from_public_key(key),
                "Trusting delegated issuer"
            );
        }
        if !issuers.is_empty() {
            engine = engine.with_handler(DelegatedAssertionHandler::new(
                issuers,
                replay_cache.clone(),
                config.server.name.clone(),
            ));
        }
        tracing::info!(handlers = ?engine.handler_names(), node = node_id, "Authentication engine ready");

        let cas = Arc::new(CentralAuthenticationService::new(
            store,
            Arc::new(TicketFactory::new(node_id, config.tickets.policies.clone())),
            Arc::new(engine),
            Arc::new(config.service_registry()?),
            Arc::new(EventLog::new(config.server.event_capacity)),
            proxy_callback,
            clock,
        ));

        let prefix = config.server.prefix.trim_end_matches('/').to_string();
        let state = AppState {
            cas: cas.clone(),
            sessions: SessionRegistry::new(cas.clone()),
            cookie: Arc::new(CookieSettings::new(&prefix, config.server.secure_cookie)),
            v2_attributes: config.protocol.v2_attributes,
            actuator_token: config.actuator.bearer_token.as_deref().map(Arc::from),
        };

        Ok(Self {
            cas,
            state,
            limiter: LoginRateLimiter::new(config.login_rate.per_second, config.login_rate.burst),
            replay_cache,
            prefix,
            cleaner_interval: config.tickets.cleaner_interval(),
        })
    }

    pub fn cas(&self) -> &Arc<CentralAuthenticationService> {
        &self.cas
    }

    pub fn router(&self) -> Router {
        http::router(self.state.clone(), self.limiter.clone(), &self.prefix)
    }

    pub fn cleaner(&self) -> RegistryCleaner {
        RegistryCleaner::new(self.cas.clone(), self.cleaner_interval)
            .with_replay_cache(self.replay_cache.clone())
    }
}
