//! `/login` and `/logout`.

use axum::extract::{Query, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use cas_auth::Credential;
use cas_core::{Service, TicketId};

use super::{cookie, non_blank, ApiError, AppState, Client};

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    service: Option<String>,
    renew: Option<String>,
}

/// `GET /login`: single sign-on when a valid TGC is presented.
pub async fn show(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let service = non_blank(query.service).map(Service::new);
    let renew = non_blank(query.renew).is_some();
    let tgt = cookie::read(&headers);

    if let (Some(tgt), false) = (&tgt, renew) {
        match &service {
            Some(service) if state.cas.allows_sso(service) => {
                match state.cas.grant_service_ticket(tgt, service).await {
                    Ok(st) => return redirect(service, &st, None),
                    Err(err) => tracing::debug!(error = %err, "Single sign-on not possible"),
                }
            }
            Some(_) => {}
            None => {
                if let Ok(principal) = state.cas.session_principal(tgt).await {
                    return Json(json!({ "loggedIn": true, "principal": principal.id }))
                        .into_response();
                }
            }
        }
    }

    let mut response = Json(json!({
        "loginRequired": true,
        "service": service.as_ref().map(Service::as_str),
    }))
    .into_response();
    if tgt.is_some() && !renew {
        // The presented cookie no longer names a usable session.
        cookie::set(response.headers_mut(), state.cookie.clear());
    }
    response
}

#[derive(Default, Deserialize)]
pub struct LoginForm {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    issuer: Option<String>,
    assertion: Option<String>,
    service: Option<String>,
}

impl LoginForm {
    fn credential(&mut self) -> Option<Credential> {
        if let (Some(username), Some(password)) = (
            non_blank(self.username.take()),
            self.password.take().filter(|p| !p.is_empty()),
        ) {
            return Some(Credential::password(username, password));
        }
        if let Some(token) = non_blank(self.token.take()) {
            return Some(Credential::Token { token });
        }
        if let (Some(issuer), Some(assertion)) = (
            non_blank(self.issuer.take()),
            non_blank(self.assertion.take()),
        ) {
            return Some(Credential::DelegatedAssertion { issuer, assertion });
        }
        None
    }
}

/// `POST /login`: authenticate, open a session and, with a service, redirect
/// back to it with a service ticket.
pub async fn submit(
    State(state): State<AppState>,
    Client(client): Client,
    Form(mut form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    let credential = form.credential().ok_or_else(|| {
        ApiError::bad_request("username and password, token, or issuer and assertion required")
    })?;
    let service = non_blank(form.service.take()).map(Service::new);

    let outcome = state
        .cas
        .login(&credential, &client, service.as_ref())
        .await?;
    let tgc = state.cookie.issue(&outcome.ticket_granting_ticket);

    match (service, outcome.service_ticket) {
        (Some(service), Some(st)) => Ok(redirect(&service, &st, tgc)),
        _ => {
            let mut response = Json(json!({
                "ticketGrantingTicket": outcome.ticket_granting_ticket,
                "principal": outcome.principal.id,
                "attributes": outcome.principal.attributes,
            }))
            .into_response();
            cookie::set(response.headers_mut(), tgc);
            Ok(response)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    service: Option<String>,
}

/// `GET /logout`: destroy the session named by the TGC.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
) -> Result<Response, ApiError> {
    let destroyed = match cookie::read(&headers) {
        Some(tgt) => state.cas.destroy_ticket_granting_ticket(&tgt).await?,
        None => false,
    };

    let service = non_blank(query.service).map(Service::new);
    let mut response = match service {
        Some(service) if state.cas.authorized_service(&service).is_ok() => {
            match HeaderValue::from_str(service.as_str()) {
                Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
                Err(_) => Json(json!({ "loggedOut": destroyed })).into_response(),
            }
        }
        _ => Json(json!({ "loggedOut": destroyed })).into_response(),
    };
    cookie::set(response.headers_mut(), state.cookie.clear());
    Ok(response)
}

/// 302 to `service` with `ticket` appended to its query.
fn redirect(service: &Service, ticket: &TicketId, tgc: Option<HeaderValue>) -> Response {
    let location = with_ticket(service, ticket);
    let mut response = match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        Err(_) => ApiError::bad_request("service is not a valid URL").into_response(),
    };
    cookie::set(response.headers_mut(), tgc);
    response
}

fn with_ticket(service: &Service, ticket: &TicketId) -> String {
    let url = service.as_str();
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut location = format!("{base}{separator}ticket={ticket}");
    if let Some(fragment) = fragment {
        location.push('#');
        location.push_str(fragment);
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_is_appended_to_query() {
        let st = TicketId::new("ST-1-abc-node");
        assert_eq!(
            with_ticket(&Service::new("https://app.example.org/"), &st),
            "https://app.example.org/?ticket=ST-1-abc-node"
        );
        assert_eq!(
            with_ticket(&Service::new("https://app.example.org/?a=1#top"), &st),
            "https://app.example.org/?a=1&ticket=ST-1-abc-node#top"
        );
    }

    #[test]
    fn credential_from_form() {
        let mut form = LoginForm {
            username: Some("casuser".into()),
            password: Some("Mellon".into()),
            ..LoginForm::default()
        };
        assert!(matches!(
            form.credential(),
            Some(Credential::UsernamePassword { username, .. }) if username == "casuser"
        ));

        let mut form = LoginForm {
            issuer: Some("idp".into()),
            assertion: Some("a.b".into()),
            ..LoginForm::default()
        };
        assert!(matches!(form.credential(), Some(Credential::DelegatedAssertion { .. })));

        let mut empty = LoginForm {
            username: Some("casuser".into()),
            ..LoginForm::default()
        };
        assert!(empty.credential().is_none());
    }
}
