//! Ticket validation endpoints (CAS 1.0, 2.0 and 3.0).

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use cas_core::protocol::CAS1_FAILURE;
use cas_core::{
    ProtocolFailure, ProtocolVersion, ResponseFormat, Service, ServiceResponse, TicketId,
};

use super::{non_blank, AppState};
use crate::cas::ValidationRequest;
use crate::error::CasError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateParams {
    ticket: Option<String>,
    service: Option<String>,
    pgt_url: Option<String>,
    renew: Option<String>,
    format: Option<String>,
}

pub async fn service_validate(state: State<AppState>, params: Query<ValidateParams>) -> Response {
    validate(state, params, ProtocolVersion::V2, false).await
}

pub async fn proxy_validate(state: State<AppState>, params: Query<ValidateParams>) -> Response {
    validate(state, params, ProtocolVersion::V2, true).await
}

pub async fn p3_service_validate(state: State<AppState>, params: Query<ValidateParams>) -> Response {
    validate(state, params, ProtocolVersion::V3, false).await
}

pub async fn p3_proxy_validate(state: State<AppState>, params: Query<ValidateParams>) -> Response {
    validate(state, params, ProtocolVersion::V3, true).await
}

async fn validate(
    State(state): State<AppState>,
    Query(params): Query<ValidateParams>,
    version: ProtocolVersion,
    allow_proxy_tickets: bool,
) -> Response {
    let format = ResponseFormat::from_param(params.format.as_deref());
    let (ticket, service) = match required(params.ticket, params.service) {
        Ok(pair) => pair,
        Err(err) => return failure(&err, format),
    };
    let request = ValidationRequest {
        renew: non_blank(params.renew).is_some(),
        allow_proxy_tickets,
        pgt_url: non_blank(params.pgt_url).map(Service::new),
    };

    match state
        .cas
        .validate_service_ticket(&ticket, &service, &request)
        .await
    {
        Ok(assertion) => {
            let body = ServiceResponse::AuthenticationSuccess(
                assertion.to_success(version, state.v2_attributes),
            );
            render(StatusCode::OK, &body, format)
        }
        Err(err) => failure(&err, format),
    }
}

/// `GET /validate`: CAS 1.0 plain-text answer.
pub async fn cas1(State(state): State<AppState>, Query(params): Query<ValidateParams>) -> Response {
    let Ok((ticket, service)) = required(params.ticket, params.service) else {
        return plain(StatusCode::OK, CAS1_FAILURE.to_string());
    };
    let request = ValidationRequest {
        renew: non_blank(params.renew).is_some(),
        ..ValidationRequest::default()
    };
    match state
        .cas
        .validate_service_ticket(&ticket, &service, &request)
        .await
    {
        Ok(assertion) => plain(StatusCode::OK, assertion.to_cas1()),
        Err(err) => plain(err.status(), CAS1_FAILURE.to_string()),
    }
}

fn required(
    ticket: Option<String>,
    service: Option<String>,
) -> Result<(TicketId, Service), CasError> {
    match (non_blank(ticket), non_blank(service)) {
        (Some(ticket), Some(service)) => Ok((TicketId::new(ticket), Service::new(service))),
        _ => Err(CasError::InvalidRequest(
            "Not all of the required parameters [service, ticket] were present".to_string(),
        )),
    }
}

fn failure(err: &CasError, format: ResponseFormat) -> Response {
    if err.status().is_server_error() {
        tracing::error!(error = %err, "Validation failed");
    }
    let body = ServiceResponse::AuthenticationFailure(ProtocolFailure::new(
        err.code(),
        err.to_string(),
    ));
    render(err.status(), &body, format)
}

fn render(status: StatusCode, body: &ServiceResponse, format: ResponseFormat) -> Response {
    (
        status,
        [(CONTENT_TYPE, format.content_type())],
        body.render(format),
    )
        .into_response()
}

fn plain(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, "text/plain;charset=UTF-8")], body).into_response()
}
