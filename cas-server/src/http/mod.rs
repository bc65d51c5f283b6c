//! HTTP surface: the CAS protocol endpoints plus actuator and health.
//!
//! Every route is listed in [`router`]. Handlers receive [`AppState`] and
//! never touch global state.

mod actuator;
mod client;
pub mod cookie;
mod login;
mod proxy;
mod validate;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{middleware, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::cas::CentralAuthenticationService;
use crate::error::CasError;
use crate::services::{limit_logins, LoginRateLimiter};
use crate::sessions::SessionRegistry;

pub use client::Client;
pub use cookie::CookieSettings;

#[derive(Clone)]
pub struct AppState {
    pub cas: Arc<CentralAuthenticationService>,
    pub sessions: SessionRegistry,
    pub cookie: Arc<CookieSettings>,
    /// Include attributes in CAS 2.0 validation responses.
    pub v2_attributes: bool,
    /// Bearer token required on `/actuator/*`; open when `None`.
    pub actuator_token: Option<Arc<str>>,
}

pub fn router(state: AppState, limiter: LoginRateLimiter, prefix: &str) -> Router {
    let actuator = Router::new()
        .route(
            "/ssoSessions",
            get(actuator::list_sessions).delete(actuator::destroy_sessions),
        )
        .route("/ssoSessions/:ticket", delete(actuator::destroy_session))
        .route(
            "/events",
            get(actuator::list_events).delete(actuator::clear_events),
        )
        .route("/throttles", delete(actuator::clear_throttles))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            actuator::require_bearer,
        ));

    let cas = Router::new()
        .route(
            "/login",
            get(login::show)
                .post(login::submit)
                .route_layer(middleware::from_fn_with_state(limiter, limit_logins)),
        )
        .route("/logout", get(login::logout))
        .route("/validate", get(validate::cas1))
        .route("/serviceValidate", get(validate::service_validate))
        .route("/proxyValidate", get(validate::proxy_validate))
        .route("/p3/serviceValidate", get(validate::p3_service_validate))
        .route("/p3/proxyValidate", get(validate::p3_proxy_validate))
        .route("/proxy", get(proxy::proxy))
        .route("/health", get(health))
        .nest("/actuator", actuator)
        .with_state(state);

    let app = if prefix.is_empty() || prefix == "/" {
        cas
    } else {
        Router::new().nest(prefix, cas)
    };
    app.layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

/// JSON error for the non-protocol endpoints (login, actuator).
pub(crate) struct ApiError {
    status: StatusCode,
    code: String,
    description: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &str, description: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            description: description.into(),
        }
    }

    pub(crate) fn bad_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", description)
    }
}

impl From<CasError> for ApiError {
    fn from(err: CasError) -> Self {
        let status = match &err {
            CasError::Authentication(_) | CasError::StoreUnavailable(_) => err.status(),
            CasError::UnauthorizedService(_) => StatusCode::FORBIDDEN,
            CasError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }
        Self::new(status, err.code().as_str(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.code, "description": self.description })),
        )
            .into_response()
    }
}

/// Treat blank query values as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
