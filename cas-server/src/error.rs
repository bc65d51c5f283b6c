//! Errors of the central authentication service.

use axum::http::StatusCode;

use cas_auth::AuthenticationError;
use cas_core::ValidationErrorCode;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CasError {
    /// A required parameter is missing.
    #[error("{0}")]
    InvalidRequest(String),

    /// Unknown, expired, consumed or wrong-kind ticket.
    #[error("{0}")]
    InvalidTicket(String),

    /// The presented service does not match the ticket's service.
    #[error("{0}")]
    InvalidService(String),

    /// The service is not registered or not enabled.
    #[error("{0}")]
    UnauthorizedService(String),

    /// The service may not obtain proxy-granting tickets.
    #[error("{0}")]
    UnauthorizedServiceProxy(String),

    #[error("{0}")]
    InvalidProxyCallback(String),

    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("ticket store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CasError {
    pub fn invalid_ticket(id: impl std::fmt::Display) -> Self {
        Self::InvalidTicket(format!("Ticket '{id}' not recognized"))
    }

    /// Protocol code reported in failure bodies.
    pub fn code(&self) -> ValidationErrorCode {
        match self {
            Self::InvalidRequest(_) => ValidationErrorCode::InvalidRequest,
            Self::InvalidTicket(_) | Self::Authentication(_) => ValidationErrorCode::InvalidTicket,
            Self::InvalidService(_) => ValidationErrorCode::InvalidService,
            Self::UnauthorizedService(_) => ValidationErrorCode::UnauthorizedService,
            Self::UnauthorizedServiceProxy(_) => ValidationErrorCode::UnauthorizedServiceProxy,
            Self::InvalidProxyCallback(_) => ValidationErrorCode::InvalidProxyCallback,
            Self::StoreUnavailable(_) => ValidationErrorCode::InternalError,
        }
    }

    /// HTTP status. Protocol failures are answered with 200 and a failure
    /// body; only infrastructure faults are server errors.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Authentication(AuthenticationError::ThrottledTooManyAttempts) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::OK,
        }
    }
}

impl From<StoreError> for CasError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) | StoreError::AlreadyConsumed(id) => Self::invalid_ticket(id),
            StoreError::Duplicate(id) => Self::StoreUnavailable(format!("duplicate ticket id {id}")),
            StoreError::Unavailable(msg) | StoreError::Corrupt(msg) => Self::StoreUnavailable(msg),
        }
    }
}
