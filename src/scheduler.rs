use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::TokenError;
use crate::oauth::{ManagerState, TokenManager};

/// Periodically asks the manager for a fresh token so credentials stay warm
/// without traffic. Failures are logged and left for the next tick.
#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    manager: TokenManager,
    interval: Duration,
    timeout: Option<Duration>,
}

impl RefreshScheduler {
    pub fn new(manager: TokenManager, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// One proactive check. The error is returned for callers that care, the
    /// run loop ignores it.
    pub async fn tick(&self) -> Result<(), TokenError> {
        let before = self.manager.state();
        match self.manager.ensure_fresh(self.timeout).await {
            Ok(_) => {
                if before != ManagerState::Fresh {
                    tracing::info!("Scheduled refresh completed");
                } else {
                    tracing::trace!("Token still fresh");
                }
                Ok(())
            }
            Err(TokenError::MissingCredentials) => {
                tracing::warn!("No credentials to keep fresh; run `tokenkeeper auth`");
                Err(TokenError::MissingCredentials)
            }
            Err(e) => {
                tracing::warn!("Scheduled refresh failed ({}): {e}", e.code());
                Err(e)
            }
        }
    }

    /// Run forever on a background task; abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "Refresh scheduler started (every {}s)",
            self.interval.as_secs()
        );
        loop {
            ticker.tick().await;
            let _ = self.tick().await;
        }
    }
}
