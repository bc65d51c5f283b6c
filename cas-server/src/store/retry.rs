//! Retry decorator for transient store faults.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use cas_core::{Ticket, TicketId, TicketKind};

use super::{StoreError, TicketModifier, TicketPredicate, TicketStore};

const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Retries an operation once when the inner store reports `Unavailable`.
///
/// Every other error is returned as is: a missing or consumed ticket does not
/// become valid by asking again.
pub struct RetryingTicketStore {
    inner: Arc<dyn TicketStore>,
    backoff: Duration,
}

impl RetryingTicketStore {
    pub fn new(inner: Arc<dyn TicketStore>) -> Self {
        Self {
            inner,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn retry<'a, T, F, Fut>(&'a self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: Fn(&'a dyn TicketStore) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match f(self.inner.as_ref()).await {
            Err(err) if err.is_transient() => {
                warn!(op, error = %err, "Ticket store unavailable, retrying");
                tokio::time::sleep(self.backoff).await;
                f(self.inner.as_ref()).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl TicketStore for RetryingTicketStore {
    async fn put(&self, ticket: &Ticket) -> Result<(), StoreError> {
        self.retry("put", |s| s.put(ticket)).await
    }

    async fn put_all(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
        self.retry("put_all", |s| s.put_all(tickets)).await
    }

    async fn get(&self, id: &TicketId) -> Result<Ticket, StoreError> {
        self.retry("get", |s| s.get(id)).await
    }

    async fn modify(&self, id: &TicketId, f: TicketModifier<'_>) -> Result<Ticket, StoreError> {
        self.retry("modify", |s| s.modify(id, f)).await
    }

    async fn delete(&self, id: &TicketId) -> Result<bool, StoreError> {
        self.retry("delete", |s| s.delete(id)).await
    }

    async fn delete_many(&self, ids: &[TicketId]) -> Result<usize, StoreError> {
        self.retry("delete_many", |s| s.delete_many(ids)).await
    }

    async fn delete_all(&self, predicate: TicketPredicate<'_>) -> Result<usize, StoreError> {
        self.retry("delete_all", |s| s.delete_all(predicate)).await
    }

    async fn consume(&self, id: &TicketId, now: DateTime<Utc>) -> Result<Ticket, StoreError> {
        self.retry("consume", |s| s.consume(id, now)).await
    }

    async fn list(&self, kind: Option<TicketKind>) -> Result<Vec<Ticket>, StoreError> {
        self.retry("list", |s| s.list(kind)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::{testing, MemoryTicketStore};

    /// Fails the first `failures` calls to `get` with the given error.
    struct Flaky {
        inner: MemoryTicketStore,
        failures: AtomicUsize,
        error: StoreError,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize, error: StoreError) -> Self {
            Self {
                inner: MemoryTicketStore::new(),
                failures: AtomicUsize::new(failures),
                error,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TicketStore for Flaky {
        async fn put(&self, ticket: &Ticket) -> Result<(), StoreError> {
            self.inner.put(ticket).await
        }
        async fn put_all(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
            self.inner.put_all(tickets).await
        }
        async fn get(&self, id: &TicketId) -> Result<Ticket, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            self.inner.get(id).await
        }
        async fn modify(&self, id: &TicketId, f: TicketModifier<'_>) -> Result<Ticket, StoreError> {
            self.inner.modify(id, f).await
        }
        async fn delete(&self, id: &TicketId) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }
        async fn delete_many(&self, ids: &[TicketId]) -> Result<usize, StoreError> {
            self.inner.delete_many(ids).await
        }
        async fn delete_all(&self, predicate: TicketPredicate<'_>) -> Result<usize, StoreError> {
            self.inner.delete_all(predicate).await
        }
        async fn consume(&self, id: &TicketId, now: DateTime<Utc>) -> Result<Ticket, StoreError> {
            self.inner.consume(id, now).await
        }
        async fn list(&self, kind: Option<TicketKind>) -> Result<Vec<Ticket>, StoreError> {
            self.inner.list(kind).await
        }
    }

    fn wrap(flaky: Arc<Flaky>) -> RetryingTicketStore {
        RetryingTicketStore::new(flaky).with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let flaky = Arc::new(Flaky::new(1, StoreError::Unavailable("locked".into())));
        let now = Utc::now();
        flaky.put(&testing::tgt("TGT-1-a-node", now)).await.unwrap();

        let store = wrap(flaky.clone());
        assert!(store.get(&TicketId::new("TGT-1-a-node")).await.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_after_one_retry() {
        let flaky = Arc::new(Flaky::new(5, StoreError::Unavailable("down".into())));
        let store = wrap(flaky.clone());
        let result = store.get(&TicketId::new("TGT-1-a-node")).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_is_never_retried() {
        let flaky = Arc::new(Flaky::new(0, StoreError::Unavailable("unused".into())));
        let store = wrap(flaky.clone());
        let result = store.get(&TicketId::new("TGT-404-a-node")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decorated_store_keeps_contract() {
        testing::exercise(&RetryingTicketStore::new(Arc::new(MemoryTicketStore::new()))).await;
    }
}
