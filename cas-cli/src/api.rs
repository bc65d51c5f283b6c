//! HTTP client for the CAS server.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::{AUTHORIZATION, LOCATION, SET_COOKIE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

pub struct CasClient {
    http: reqwest::Client,
    base: String,
    actuator_token: Option<String>,
}

/// Result of `POST /login`.
pub struct LoginResult {
    pub ticket_granting_ticket: Option<String>,
    /// Redirect target carrying the service ticket, when a service was given.
    pub redirect: Option<String>,
    pub body: Option<serde_json::Value>,
}

impl CasClient {
    pub fn new(base: &str, actuator_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            // The login redirect is the answer, not something to follow.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            actuator_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base, path))
    }

    fn actuator(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.request(method, &format!("/actuator{path}"));
        match &self.actuator_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        service: Option<&str>,
    ) -> Result<LoginResult> {
        let mut form = vec![("username", username), ("password", password)];
        if let Some(service) = service {
            form.push(("service", service));
        }
        let response = self
            .request(Method::POST, "/login")
            .form(&form)
            .send()
            .await
            .context("Failed to reach CAS server")?;

        let ticket_granting_ticket = tgc(&response);
        if response.status() == StatusCode::FOUND {
            let redirect = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(LoginResult {
                ticket_granting_ticket,
                redirect,
                body: None,
            });
        }
        let body = check(response).await?.json().await?;
        Ok(LoginResult {
            ticket_granting_ticket,
            redirect: None,
            body: Some(body),
        })
    }

    /// Raw body of a validation or proxy endpoint.
    pub async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .request(Method::GET, path)
            .query(query)
            .send()
            .await
            .context("Failed to reach CAS server")?;
        Ok(check(response).await?.text().await?)
    }

    pub async fn actuator_get(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let response = self
            .actuator(Method::GET, path)
            .query(query)
            .send()
            .await
            .context("Failed to reach CAS server")?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn actuator_delete(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        let response = self
            .actuator(Method::DELETE, path)
            .query(query)
            .send()
            .await
            .context("Failed to reach CAS server")?;
        Ok(check(response).await?.json().await?)
    }
}

fn tgc(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.strip_prefix("TGC="))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
        .find(|v| !v.is_empty())
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!(describe_failure(status, &body)))
}

/// One-line explanation of a failed request.
pub fn describe_failure(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["description"].as_str().map(str::to_string))
        .filter(|d| !d.is_empty());

    match status {
        StatusCode::UNAUTHORIZED => match detail {
            Some(detail) => format!("not authorized: {detail}"),
            None => "not authorized: set --token or CAS_ACTUATOR_TOKEN".to_string(),
        },
        StatusCode::FORBIDDEN => match detail {
            Some(detail) => format!("forbidden: {detail}"),
            None => "forbidden".to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => "too many attempts, try again later".to_string(),
        s if s.is_server_error() => format!("server error ({s}), check server logs"),
        s => match detail {
            Some(detail) => format!("request failed ({s}): {detail}"),
            None => format!("request failed ({s})"),
        },
    }
}

/// Ticket from a `...?ticket=ST-...` redirect.
pub fn ticket_from_redirect(location: &str) -> Result<String> {
    let Some((_, query)) = location.split_once('?') else {
        bail!("redirect carries no ticket: {location}");
    };
    query
        .split(['&', '#'])
        .find_map(|pair| pair.strip_prefix("ticket="))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("redirect carries no ticket: {location}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_banners() {
        assert_eq!(
            describe_failure(StatusCode::UNAUTHORIZED, ""),
            "not authorized: set --token or CAS_ACTUATOR_TOKEN"
        );
        assert_eq!(
            describe_failure(
                StatusCode::FORBIDDEN,
                r#"{"error":"FORBIDDEN","description":"bearer token not accepted"}"#
            ),
            "forbidden: bearer token not accepted"
        );
        assert!(describe_failure(StatusCode::BAD_GATEWAY, "").contains("check server logs"));
        assert_eq!(
            describe_failure(
                StatusCode::BAD_REQUEST,
                r#"{"error":"INVALID_REQUEST","description":"unknown session type"}"#
            ),
            "request failed (400 Bad Request): unknown session type"
        );
    }

    #[test]
    fn ticket_is_read_from_redirect() {
        assert_eq!(
            ticket_from_redirect("https://app.example.org/?a=1&ticket=ST-1-x-node#top").unwrap(),
            "ST-1-x-node"
        );
        assert!(ticket_from_redirect("https://app.example.org/").is_err());
    }
}
