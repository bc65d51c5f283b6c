//! Background removal of expired tickets and stale authentication state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use cas_auth::LruReplayCache;

use crate::cas::CentralAuthenticationService;

/// Signal that stops background tasks.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.recv().await;
    }
}

pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            sender: self.sender.clone(),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RegistryCleaner {
    cas: Arc<CentralAuthenticationService>,
    replay_cache: Option<Arc<LruReplayCache>>,
    period: Duration,
}

impl RegistryCleaner {
    pub fn new(cas: Arc<CentralAuthenticationService>, period: Duration) -> Self {
        Self {
            cas,
            replay_cache: None,
            period,
        }
    }

    pub fn with_replay_cache(mut self, cache: Arc<LruReplayCache>) -> Self {
        self.replay_cache = Some(cache);
        self
    }

    /// One pass. Returns the number of tickets removed.
    pub async fn run_once(&self) -> usize {
        let now = self.cas.now();
        self.cas.engine().throttle().prune(now);
        if let Some(cache) = &self.replay_cache {
            cache.cleanup_expired();
        }
        match self.cas.delete_expired_tickets().await {
            Ok(0) => 0,
            Ok(removed) => {
                tracing::info!(removed, "Removed expired tickets");
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ticket cleanup failed");
                0
            }
        }
    }

    /// Run until `shutdown` fires. The first pass happens after one period.
    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Ticket cleaner stopped");
                        break;
                    }
                }
            }
        })
    }
}
