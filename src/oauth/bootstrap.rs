use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::error::TokenError;
use crate::oauth::manager::TokenManager;
use crate::oauth::record::TokenRecord;
use crate::oauth::state::{build_authorize_url, generate_state};
use crate::oauth::token::{exchange_code, GrantError};

/// How long a generated state nonce stays acceptable.
pub const STATE_TTL: Duration = Duration::from_secs(600);

/// An authorization request the browser should be sent to.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

struct PendingState {
    redirect_uri: String,
    issued: Instant,
}

/// One-shot bootstrap: authorization code in, first [`TokenRecord`] persisted.
pub struct AuthorizationCodeExchanger {
    manager: TokenManager,
    pending: Mutex<HashMap<String, PendingState>>,
    ttl: Duration,
}

impl AuthorizationCodeExchanger {
    pub fn new(manager: TokenManager) -> Self {
        Self {
            manager,
            pending: Mutex::new(HashMap::new()),
            ttl: STATE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Generate a state nonce and the authorize URL that carries it.
    pub fn begin(&self) -> Result<AuthorizationRequest, TokenError> {
        let state = generate_state();
        let url = build_authorize_url(self.manager.config(), &state)?;
        self.remember(&state);
        Ok(AuthorizationRequest { url, state })
    }

    fn remember(&self, state: &str) {
        let mut pending = self.lock_pending();
        let ttl = self.ttl;
        pending.retain(|_, p| p.issued.elapsed() < ttl);
        pending.insert(
            state.to_string(),
            PendingState {
                redirect_uri: self.manager.config().redirect_uri.clone(),
                issued: Instant::now(),
            },
        );
    }

    /// Consume a nonce; each one is good for exactly one callback.
    fn take(&self, state: &str) -> Option<PendingState> {
        let mut pending = self.lock_pending();
        pending
            .remove(state)
            .filter(|p| p.issued.elapsed() < self.ttl)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingState>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exchange the code after checking the returned state nonce.
    ///
    /// Nothing is persisted unless the token endpoint accepts the code.
    pub async fn complete(&self, code: &str, state: &str) -> Result<TokenRecord, TokenError> {
        let pending = self.take(state).ok_or_else(|| {
            tracing::warn!("Rejected OAuth callback with unknown or expired state");
            TokenError::StateMismatch
        })?;

        let resp = exchange_code(
            self.manager.http(),
            self.manager.config(),
            code,
            &pending.redirect_uri,
        )
        .await
        .map_err(|e| match e {
            GrantError::Rejected { status, body } => TokenError::BootstrapFailed { status, body },
            GrantError::Transient(msg) => TokenError::Network(msg),
            GrantError::Malformed(msg) => TokenError::InvalidResponse(msg),
        })?;

        let record = TokenRecord::from_response(resp, Utc::now().timestamp_millis());
        self.manager.install(record.clone()).await?;
        tracing::info!("Authorization code exchanged (expires {:?})", record.expires_at());
        Ok(record)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }
}
