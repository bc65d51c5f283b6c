//! Test harness for HTTP-level tests.
//!
//! Requests go straight into the router with `oneshot` (no network), and
//! every node runs on a shared manual clock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tower::ServiceExt;

use cas_core::{ManualClock, Service, TicketId};
use cas_server::config::CasConfig;
use cas_server::proxy_callback::{CallbackError, ProxyCallback};
use cas_server::store::{MemoryTicketStore, TicketStore};
use cas_server::CasApp;

pub const APP: &str = "https://app.example.org/";
pub const PORTAL: &str = "https://portal.example.org/";
pub const BACKEND: &str = "https://backend.example.org/api";
pub const PGT_URL: &str = "https://portal.example.org/pgtCallback";
pub const ACTUATOR_TOKEN: &str = "actuator-secret";

/// Records delivered PGTs instead of calling out.
#[derive(Default)]
pub struct RecordingCallback {
    pub fail: bool,
    delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingCallback {
    /// `(pgtId, pgtIou)` pairs in delivery order.
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }

    /// The PGT delivered with `iou`.
    pub fn pgt_for(&self, iou: &str) -> Option<String> {
        self.delivered()
            .into_iter()
            .find(|(_, i)| i == iou)
            .map(|(pgt, _)| pgt)
    }
}

#[async_trait]
impl ProxyCallback for RecordingCallback {
    async fn deliver(
        &self,
        _callback: &Service,
        pgt: &TicketId,
        pgt_iou: &str,
    ) -> Result<(), CallbackError> {
        if self.fail {
            return Err(CallbackError::Status(404));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((pgt.to_string(), pgt_iou.to_string()));
        Ok(())
    }
}

/// Configuration used by every test node: the default casuser/Mellon
/// account, a proxying portal, a plain app and a protected actuator.
pub fn test_config() -> CasConfig {
    let mut config = CasConfig::default();
    config.login_rate.burst = 10_000;
    config.login_rate.per_second = 10_000;
    config.actuator.bearer_token = Some(ACTUATOR_TOKEN.to_string());
    config.services = serde_json::from_value(serde_json::json!([
        {
            "id": 10,
            "name": "portal",
            "pattern": "^https://portal\\.example\\.org/.*",
            "proxy": { "allowed": true, "callback_pattern": "^https://portal\\.example\\.org/.*" }
        },
        {
            "id": 20,
            "name": "app",
            "pattern": "^https://app\\.example\\.org/.*"
        },
        {
            "id": 30,
            "name": "backend",
            "pattern": "^https://backend\\.example\\.org/.*"
        }
    ]))
    .unwrap();
    config
}

/// One CAS node.
pub struct TestCas {
    pub app: CasApp,
    router: Router,
    pub clock: Arc<ManualClock>,
    pub callback: Arc<RecordingCallback>,
}

impl TestCas {
    /// Single node, in-memory store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CasConfig) -> Self {
        Self::build(
            config,
            "node1",
            Arc::new(MemoryTicketStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(RecordingCallback::default()),
        )
    }

    /// A node over `store`, sharing `clock` with its peers.
    pub fn node(store: Arc<dyn TicketStore>, node_id: &str, clock: Arc<ManualClock>) -> Self {
        Self::build(
            test_config(),
            node_id,
            store,
            clock,
            Arc::new(RecordingCallback::default()),
        )
    }

    pub fn with_failing_callback() -> Self {
        Self::build(
            test_config(),
            "node1",
            Arc::new(MemoryTicketStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(RecordingCallback {
                fail: true,
                ..RecordingCallback::default()
            }),
        )
    }

    fn build(
        config: CasConfig,
        node_id: &str,
        store: Arc<dyn TicketStore>,
        clock: Arc<ManualClock>,
        callback: Arc<RecordingCallback>,
    ) -> Self {
        let app = CasApp::new(
            &config,
            node_id,
            store,
            None,
            callback.clone(),
            clock.clone(),
        )
        .expect("Failed to build test node");
        let router = app.router();
        Self {
            app,
            router,
            clock,
            callback,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_with_cookie(&self, uri: &str, tgc: &str) -> TestResponse {
        self.send(
            Request::get(uri)
                .header(COOKIE, format!("TGC={tgc}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn actuator(&self, method: &str, uri: &str, token: Option<&str>) -> TestResponse {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    /// `POST /login` with a form built from `fields`.
    pub async fn post_login(&self, fields: &[(&str, &str)]) -> TestResponse {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.send(
            Request::post("/login")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header("x-forwarded-for", "192.0.2.10")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str, service: Option<&str>) -> TestResponse {
        let mut fields = vec![("username", username), ("password", password)];
        if let Some(service) = service {
            fields.push(("service", service));
        }
        self.post_login(&fields).await
    }

    /// Log in as casuser and return `(tgt, st)` for `service`.
    pub async fn casuser_ticket(&self, service: &str) -> (String, String) {
        let response = self.login("casuser", "Mellon", Some(service)).await;
        assert_eq!(response.status, StatusCode::FOUND, "login failed: {}", response.body);
        let tgt = response.tgc().expect("login sets a TGC");
        let st = response.ticket().expect("redirect carries a ticket");
        (tgt, st)
    }

    pub async fn service_validate(&self, ticket: &str, service: &str) -> TestResponse {
        self.get(&format!(
            "/serviceValidate?ticket={}&service={}",
            encode(ticket),
            encode(service)
        ))
        .await
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("not JSON ({e}): {}", self.body))
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// `ticket` query parameter of the redirect.
    pub fn ticket(&self) -> Option<String> {
        let location = self.location()?;
        let (_, query) = location.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("ticket="))
            .map(|t| t.split('#').next().unwrap_or(t).to_string())
    }

    /// Non-empty `TGC` value from `Set-Cookie`.
    pub fn tgc(&self) -> Option<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.strip_prefix("TGC="))
            .map(|v| v.split(';').next().unwrap_or_default().to_string())
            .find(|v| !v.is_empty())
    }

    pub fn clears_tgc(&self) -> bool {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with("TGC=;") && v.contains("Max-Age=0"))
    }
}

/// Percent-encode everything outside the unreserved set.
pub fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
