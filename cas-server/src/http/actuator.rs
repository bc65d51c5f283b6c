//! Actuator endpoints: SSO sessions, events and throttles.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use cas_core::{CasEvent, TicketId};

use super::{non_blank, ApiError, AppState};
use crate::sessions::{SessionReport, SessionScope};

/// Missing credentials answer 401, a wrong token 403.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.actuator_token.as_deref() else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        None => ApiError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "bearer token required",
        )
        .into_response(),
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            next.run(request).await
        }
        Some(_) => {
            tracing::warn!("Rejected actuator request with wrong bearer token");
            ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "bearer token not accepted")
                .into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "type")]
    scope: Option<String>,
    username: Option<String>,
}

impl SessionQuery {
    fn scope(&self) -> Result<Option<SessionScope>, ApiError> {
        match non_blank(self.scope.clone()) {
            Some(scope) => scope
                .parse()
                .map(Some)
                .map_err(|e: crate::sessions::UnknownScope| ApiError::bad_request(e.to_string())),
            None => Ok(None),
        }
    }
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionReport>, ApiError> {
    let scope = query.scope()?.unwrap_or_default();
    let username = non_blank(query.username);
    let report = state.sessions.list(scope, username.as_deref()).await?;
    Ok(Json(report))
}

/// Destroy by `username`, or by `type` when no username is given.
pub async fn destroy_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let scope = query.scope()?;
    if let Some(username) = non_blank(query.username) {
        let destroyed = state.sessions.destroy_for_principal(&username).await?;
        let body: BTreeMap<String, Value> = destroyed
            .into_iter()
            .map(|tgt| {
                let entry = json!({ "status": 200, "ticketGrantingTicket": tgt });
                (tgt.to_string(), entry)
            })
            .collect();
        return Ok(Json(body).into_response());
    }
    let Some(scope) = scope else {
        return Ok((StatusCode::BAD_REQUEST, Json(json!({ "status": 400 }))).into_response());
    };
    let destroyed = state.sessions.destroy_scope(scope).await?;
    tracing::info!(destroyed, "Destroyed sessions");
    Ok(Json(json!({ "status": 200, "destroyed": destroyed })).into_response())
}

pub async fn destroy_session(
    State(state): State<AppState>,
    Path(ticket): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tgt = TicketId::new(ticket);
    let destroyed = state.sessions.destroy(&tgt).await?;
    Ok(Json(json!({
        "status": 200,
        "ticketGrantingTicket": tgt,
        "destroyed": destroyed,
    })))
}

pub async fn list_events(State(state): State<AppState>) -> Json<Vec<CasEvent>> {
    Json(state.cas.events().list())
}

pub async fn clear_events(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.cas.events().clear();
    Json(json!({ "cleared": cleared }))
}

pub async fn clear_throttles(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.cas.engine().throttle().clear_all();
    tracing::info!(cleared, "Cleared authentication throttles");
    Json(json!({ "cleared": cleared }))
}
