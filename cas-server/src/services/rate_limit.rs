//! Rate limiting for the login endpoint.
//!
//! Complements the per-user failure throttle in `cas-auth`: this limiter
//! caps the total rate of credential submissions regardless of outcome.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

const DEFAULT_PER_SECOND: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};
const DEFAULT_BURST: NonZeroU32 = match NonZeroU32::new(20) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

/// Returned when the login rate is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("login rate exceeded")]
pub struct RateLimited;

/// Rate limiter for `POST /login`.
#[derive(Clone)]
pub struct LoginRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl LoginRateLimiter {
    /// Create a limiter allowing `per_second` sustained requests and bursts
    /// of up to `burst_size`. Zero values fall back to the defaults.
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(DEFAULT_PER_SECOND);
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(DEFAULT_BURST);

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> Result<(), RateLimited> {
        self.limiter.check().map_err(|_| {
            tracing::warn!("Rate limit exceeded for login endpoint");
            RateLimited
        })
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PER_SECOND.get(), DEFAULT_BURST.get())
    }
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
        )
            .into_response()
    }
}

/// Middleware for credential submissions. Other methods pass through.
pub async fn limit_logins(
    State(limiter): State<LoginRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == axum::http::Method::POST {
        if let Err(limited) = limiter.check() {
            return limited.into_response();
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limiter_allows_burst() {
        let limiter = LoginRateLimiter::new(1, 5);

        for i in 0..5 {
            assert!(
                limiter.check().is_ok(),
                "Request {} should be allowed within burst",
                i
            );
        }

        assert_eq!(limiter.check(), Err(RateLimited));
    }

    #[tokio::test]
    async fn test_rate_limiter_refills() {
        let limiter = LoginRateLimiter::new(10, 1);

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        // 10 per second = 100ms per token
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_zero_falls_back_to_default() {
        let limiter = LoginRateLimiter::new(0, 0);

        for i in 0..20 {
            assert!(
                limiter.check().is_ok(),
                "Default request {} should be allowed",
                i
            );
        }
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_limited_maps_to_429() {
        assert_eq!(
            RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
