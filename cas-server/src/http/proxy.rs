//! `GET /proxy`: proxy ticket issuance.

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use cas_core::{ProtocolFailure, ProxyResponse, ResponseFormat, Service, TicketId};

use super::{non_blank, AppState};
use crate::error::CasError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyParams {
    pgt: Option<String>,
    target_service: Option<String>,
    format: Option<String>,
}

pub async fn proxy(State(state): State<AppState>, Query(params): Query<ProxyParams>) -> Response {
    let format = ResponseFormat::from_param(params.format.as_deref());
    let result = match (non_blank(params.pgt), non_blank(params.target_service)) {
        (Some(pgt), Some(target)) => state
            .cas
            .grant_proxy_ticket(&TicketId::new(pgt), &Service::new(target))
            .await
            .map(|pt| ProxyResponse::ProxySuccess {
                proxy_ticket: pt.to_string(),
            }),
        _ => Err(CasError::InvalidRequest(
            "Not all of the required parameters [pgt, targetService] were present".to_string(),
        )),
    };

    let (status, body) = match result {
        Ok(body) => (axum::http::StatusCode::OK, body),
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!(error = %err, "Proxy ticket request failed");
            }
            (
                err.status(),
                ProxyResponse::ProxyFailure(ProtocolFailure::new(err.code(), err.to_string())),
            )
        }
    };
    (
        status,
        [(CONTENT_TYPE, format.content_type())],
        body.render(format),
    )
        .into_response()
}
