use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::KeeperConfig;
use crate::error::TokenError;
use crate::oauth::record::{Freshness, TokenRecord};
use crate::oauth::store::CredentialStore;
use crate::oauth::token::{refresh_grant, GrantError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    NoCredentials,
    Fresh,
    ExpiringSoon,
    RefreshInFlight,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ManagerState::NoCredentials => "no credentials",
            ManagerState::Fresh => "fresh",
            ManagerState::ExpiringSoon => "expiring soon",
            ManagerState::RefreshInFlight => "refresh in flight",
        };
        f.write_str(label)
    }
}

/// Read-only snapshot for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub has_credentials: bool,
    pub state: ManagerState,
    pub expires_at: Option<DateTime<Utc>>,
    pub obtained_at: Option<DateTime<Utc>>,
}

/// Result of one refresh, cloned out to every waiter.
#[derive(Debug, Clone)]
enum RefreshFailure {
    Rejected(String),
    Transient(String),
    Malformed(String),
}

impl From<RefreshFailure> for TokenError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Rejected(detail) => TokenError::RefreshFailed(detail),
            RefreshFailure::Transient(detail) => TokenError::Network(detail),
            RefreshFailure::Malformed(detail) => TokenError::InvalidResponse(detail),
        }
    }
}

type Outcome = Result<String, RefreshFailure>;

#[derive(Clone, Copy)]
enum Trigger<'a> {
    /// Refresh only when the record is no longer fresh.
    IfStale,
    /// Refresh regardless of freshness.
    Force,
    /// Refresh unless the record already moved past this rejected token.
    Rejected(&'a str),
}

struct Slot {
    record: Option<TokenRecord>,
    in_flight: Option<watch::Receiver<Option<Outcome>>>,
    /// Bumped on every record replacement so a refresh that started against an
    /// older record never overwrites a newer one.
    generation: u64,
}

struct Shared {
    config: KeeperConfig,
    store: Arc<dyn CredentialStore>,
    http: reqwest::Client,
    slot: Mutex<Slot>,
    persist: tokio::sync::Mutex<()>,
    refresh_attempts: AtomicU64,
}

/// Owns the credential: decides when to refresh, coalesces concurrent
/// refreshes into one network call, and persists every replacement.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct TokenManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.shared.store)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl TokenManager {
    pub fn new(
        config: KeeperConfig,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
        initial: Option<TokenRecord>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                http,
                slot: Mutex::new(Slot {
                    record: initial,
                    in_flight: None,
                    generation: 0,
                }),
                persist: tokio::sync::Mutex::new(()),
                refresh_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Build a manager from whatever the store holds.
    pub async fn open(
        config: KeeperConfig,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
    ) -> Result<Self, TokenError> {
        let initial = store.load().await?;
        match &initial {
            Some(record) => tracing::debug!(
                "Loaded credentials from {} (expires {:?})",
                store.location(),
                record.expires_at()
            ),
            None => tracing::debug!("No credentials stored at {}", store.location()),
        }
        Ok(Self::new(config, store, http, initial))
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.shared.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.shared.http
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.shared.store
    }

    /// Number of refresh requests sent to the token endpoint so far.
    pub fn refresh_attempts(&self) -> u64 {
        self.shared.refresh_attempts.load(Ordering::SeqCst)
    }

    /// A currently valid access token, refreshing first if needed.
    ///
    /// `timeout` bounds this caller's wait only; a refresh already in flight
    /// keeps running for everyone else.
    pub async fn ensure_fresh(&self, timeout: Option<Duration>) -> Result<String, TokenError> {
        self.acquire(Trigger::IfStale, timeout).await
    }

    /// Refresh even if the token looks fresh, joining any refresh in flight.
    pub async fn force_refresh(&self, timeout: Option<Duration>) -> Result<String, TokenError> {
        self.acquire(Trigger::Force, timeout).await
    }

    /// Refresh after a resource server rejected `rejected_token`.
    ///
    /// If the stored token already differs, someone else refreshed in the
    /// meantime and the current token is returned without another call.
    pub async fn refresh_rejected(
        &self,
        rejected_token: &str,
        timeout: Option<Duration>,
    ) -> Result<String, TokenError> {
        self.acquire(Trigger::Rejected(rejected_token), timeout).await
    }

    /// Persist a newly bootstrapped record and make it current.
    pub async fn install(&self, record: TokenRecord) -> Result<(), TokenError> {
        let _persist = self.shared.persist.lock().await;
        self.shared.store.save(&record).await?;
        let mut slot = self.shared.lock_slot();
        slot.record = Some(record);
        slot.generation += 1;
        tracing::info!("Installed new credentials");
        Ok(())
    }

    /// Snapshot of the current record, if any.
    pub fn current_record(&self) -> Option<TokenRecord> {
        self.shared.lock_slot().record.clone()
    }

    pub fn state(&self) -> ManagerState {
        self.status().state
    }

    /// Side-effect-free introspection.
    pub fn status(&self) -> TokenStatus {
        let slot = self.shared.lock_slot();
        let window_ms = self.shared.window_ms();
        let state = match (&slot.in_flight, &slot.record) {
            (Some(_), _) => ManagerState::RefreshInFlight,
            (None, None) => ManagerState::NoCredentials,
            (None, Some(record)) => match record.freshness(now_ms(), window_ms) {
                Freshness::Fresh => ManagerState::Fresh,
                Freshness::ExpiringSoon => ManagerState::ExpiringSoon,
            },
        };
        TokenStatus {
            has_credentials: slot.record.is_some(),
            state,
            expires_at: slot.record.as_ref().and_then(TokenRecord::expires_at),
            obtained_at: slot.record.as_ref().and_then(TokenRecord::obtained_at),
        }
    }

    async fn acquire(
        &self,
        trigger: Trigger<'_>,
        timeout: Option<Duration>,
    ) -> Result<String, TokenError> {
        let rx = {
            let mut slot = self.shared.lock_slot();
            if let Some(rx) = &slot.in_flight {
                tracing::debug!("Joining refresh already in flight");
                rx.clone()
            } else {
                let record = slot
                    .record
                    .as_ref()
                    .ok_or(TokenError::MissingCredentials)?;
                let reuse = match trigger {
                    Trigger::IfStale => {
                        record.freshness(now_ms(), self.shared.window_ms()) == Freshness::Fresh
                    }
                    Trigger::Force => false,
                    Trigger::Rejected(token) => record.access_token != token,
                };
                if reuse {
                    tracing::trace!("Using current access token");
                    return Ok(record.access_token.clone());
                }
                self.start_refresh(&mut slot)
            }
        };
        wait_for(rx, timeout).await
    }

    /// Mark a refresh in flight and run it on its own task so that a caller
    /// giving up never cancels it.
    fn start_refresh(&self, slot: &mut Slot) -> watch::Receiver<Option<Outcome>> {
        let (tx, rx) = watch::channel(None);
        slot.in_flight = Some(rx.clone());

        let shared = Arc::clone(&self.shared);
        let generation = slot.generation;
        let record = slot.record.clone();
        tokio::spawn(async move {
            let outcome = match record {
                Some(record) => shared.run_refresh(record, generation).await,
                None => Err(RefreshFailure::Rejected("no credentials".into())),
            };
            // Nobody waiting is fine: the state is already settled.
            let _ = tx.send(Some(outcome));
        });
        rx
    }
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.safety_window().as_millis()).unwrap_or(i64::MAX)
    }

    async fn run_refresh(&self, record: TokenRecord, generation: u64) -> Outcome {
        let Some(refresh_token) = record.refresh_token.clone() else {
            tracing::error!("Access token expired and no refresh token was issued");
            return self.settle(generation, Err(RefreshFailure::Rejected(
                "no refresh token was issued".into(),
            )), None);
        };

        self.refresh_attempts.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Refreshing access token");

        match refresh_grant(&self.http, &self.config, &refresh_token).await {
            Ok(resp) => {
                let next = record.refreshed(resp, now_ms());
                let _persist = self.persist.lock().await;
                if self.lock_slot().generation != generation {
                    tracing::info!("Credentials replaced during refresh, discarding result");
                    return self.settle(generation, Ok(String::new()), None);
                }
                // The server may already have invalidated the old refresh token,
                // so the new record is adopted even if it cannot be written.
                if let Err(e) = self.store.save(&next).await {
                    tracing::error!("Failed to persist refreshed credentials: {e}");
                }
                tracing::info!("Access token refreshed (expires {:?})", next.expires_at());
                let access = next.access_token.clone();
                self.settle(generation, Ok(access), Some(next))
            }
            Err(GrantError::Rejected { status, body }) => {
                tracing::error!(
                    "Refresh token rejected with status {status}; a new authorization is required"
                );
                self.settle(
                    generation,
                    Err(RefreshFailure::Rejected(format!("status {status}: {body}"))),
                    None,
                )
            }
            Err(GrantError::Transient(msg)) => {
                tracing::warn!("Token refresh failed, will retry on next request: {msg}");
                self.settle(generation, Err(RefreshFailure::Transient(msg)), None)
            }
            Err(GrantError::Malformed(msg)) => {
                tracing::warn!("Token refresh returned an unusable response: {msg}");
                self.settle(generation, Err(RefreshFailure::Malformed(msg)), None)
            }
        }
    }

    /// Apply a refresh result and clear the in-flight marker in one step.
    ///
    /// A terminal rejection drops the in-memory record (the file stays for
    /// diagnosis); transient failures leave the record as it was.
    fn settle(&self, generation: u64, outcome: Outcome, next: Option<TokenRecord>) -> Outcome {
        let mut slot = self.lock_slot();
        slot.in_flight = None;

        if slot.generation != generation {
            return match &slot.record {
                Some(current) => Ok(current.access_token.clone()),
                None => Err(RefreshFailure::Rejected("credentials were cleared".into())),
            };
        }

        match (&outcome, next) {
            (Ok(_), Some(record)) => {
                slot.record = Some(record);
                slot.generation += 1;
            }
            (Err(RefreshFailure::Rejected(_)), _) => {
                slot.record = None;
                slot.generation += 1;
            }
            _ => {}
        }
        outcome
    }
}

async fn wait_for(
    mut rx: watch::Receiver<Option<Outcome>>,
    timeout: Option<Duration>,
) -> Result<String, TokenError> {
    let settled = async move {
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome.map_err(TokenError::from);
            }
            if rx.changed().await.is_err() {
                return Err(TokenError::Network(
                    "refresh task ended without a result".into(),
                ));
            }
        }
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, settled)
            .await
            .map_err(|_| TokenError::Timeout(limit))?,
        None => settled.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::store::FileCredentialStore;

    fn config(token_url: &str) -> KeeperConfig {
        KeeperConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: token_url.into(),
            ..KeeperConfig::default()
        }
    }

    fn record(obtained_at_ms: i64) -> TokenRecord {
        TokenRecord {
            access_token: "A1".into(),
            refresh_token: Some("R1".into()),
            token_type: "Bearer".into(),
            expires_in: 3600,
            obtained_at_ms,
        }
    }

    fn manager(dir: &tempfile::TempDir, initial: Option<TokenRecord>) -> TokenManager {
        let store = Arc::new(FileCredentialStore::new(dir.path().join("tokens.json")));
        // nothing listens on port 9, so any refresh attempt fails fast
        TokenManager::new(
            config("http://127.0.0.1:9/token"),
            store,
            reqwest::Client::new(),
            initial,
        )
    }

    #[tokio::test]
    async fn no_credentials_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, None);
        let err = mgr.ensure_fresh(None).await.unwrap_err();
        assert!(matches!(err, TokenError::MissingCredentials));
        assert_eq!(mgr.state(), ManagerState::NoCredentials);
        assert_eq!(mgr.refresh_attempts(), 0);
    }

    #[tokio::test]
    async fn fresh_token_returned_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, Some(record(now_ms())));
        for _ in 0..5 {
            assert_eq!(mgr.ensure_fresh(None).await.unwrap(), "A1");
        }
        assert_eq!(mgr.refresh_attempts(), 0);
        assert_eq!(mgr.state(), ManagerState::Fresh);
    }

    #[tokio::test]
    async fn status_reports_expiring_soon() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, Some(record(now_ms() - 3_500_000)));
        let status = mgr.status();
        assert!(status.has_credentials);
        assert_eq!(status.state, ManagerState::ExpiringSoon);
        assert!(status.expires_at.is_some());
        assert!(status.obtained_at.is_some());
    }

    #[tokio::test]
    async fn transient_failure_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let stale = record(now_ms() - 4_000_000);
        let mgr = manager(&dir, Some(stale.clone()));

        let err = mgr.ensure_fresh(None).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
        assert_eq!(mgr.current_record(), Some(stale));
        assert_eq!(mgr.state(), ManagerState::ExpiringSoon);
        assert_eq!(mgr.refresh_attempts(), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let mut stale = record(now_ms() - 4_000_000);
        stale.refresh_token = None;
        let mgr = manager(&dir, Some(stale));

        let err = mgr.ensure_fresh(None).await.unwrap_err();
        assert!(matches!(err, TokenError::RefreshFailed(_)));
        assert_eq!(mgr.state(), ManagerState::NoCredentials);
        assert!(matches!(
            mgr.ensure_fresh(None).await.unwrap_err(),
            TokenError::MissingCredentials
        ));
        assert_eq!(mgr.refresh_attempts(), 0);
    }

    #[tokio::test]
    async fn rejected_token_already_replaced_skips_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, Some(record(now_ms())));
        let token = mgr.refresh_rejected("A0-older", None).await.unwrap();
        assert_eq!(token, "A1");
        assert_eq!(mgr.refresh_attempts(), 0);
    }

    #[tokio::test]
    async fn install_persists_and_becomes_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir, None);
        mgr.install(record(now_ms())).await.unwrap();

        assert_eq!(mgr.state(), ManagerState::Fresh);
        let on_disk = mgr.store().load().await.unwrap().unwrap();
        assert_eq!(Some(on_disk), mgr.current_record());
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = TokenStatus {
            has_credentials: false,
            state: ManagerState::NoCredentials,
            expires_at: None,
            obtained_at: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "hasCredentials": false,
                "state": "no_credentials",
                "expiresAt": null,
                "obtainedAt": null
            })
        );
    }
}
