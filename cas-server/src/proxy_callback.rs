//! Delivery of proxy-granting tickets to a service's `pgtUrl`.

use std::time::Duration;

use async_trait::async_trait;

use cas_core::{Service, TicketId};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("callback request failed: {0}")]
    Request(String),
    #[error("callback answered with status {0}")]
    Status(u16),
}

/// Sends a PGT and its IOU to the callback URL.
#[async_trait]
pub trait ProxyCallback: Send + Sync {
    /// Succeeds only when the callback acknowledged the pair.
    async fn deliver(
        &self,
        callback: &Service,
        pgt: &TicketId,
        pgt_iou: &str,
    ) -> Result<(), CallbackError>;
}

/// `GET pgtUrl?pgtId=..&pgtIou=..`, any 2xx counts as delivered.
#[derive(Clone)]
pub struct HttpProxyCallback {
    client: reqwest::Client,
}

impl HttpProxyCallback {
    pub fn new() -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CallbackError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProxyCallback for HttpProxyCallback {
    async fn deliver(
        &self,
        callback: &Service,
        pgt: &TicketId,
        pgt_iou: &str,
    ) -> Result<(), CallbackError> {
        let response = self
            .client
            .get(callback.as_str())
            .query(&[("pgtId", pgt.as_str()), ("pgtIou", pgt_iou)])
            .send()
            .await
            .map_err(|e| CallbackError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CallbackError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_callback_fails() {
        let callback = HttpProxyCallback::new().unwrap();
        // Port 9 (discard) on localhost is not listening in test environments.
        let result = callback
            .deliver(
                &Service::new("https://127.0.0.1:9/pgt"),
                &TicketId::new("PGT-1-a-node"),
                "PGTIOU-1-b-node",
            )
            .await;
        assert!(matches!(result, Err(CallbackError::Request(_))));
    }
}
