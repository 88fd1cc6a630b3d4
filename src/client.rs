use std::time::Duration;

use reqwest::{Method, StatusCode};

use crate::error::TokenError;
use crate::oauth::TokenManager;

/// Calls the protected API with the manager's bearer token.
///
/// A 401 triggers one forced refresh and one retry; a second 401 is final.
#[derive(Debug, Clone)]
pub struct ApiClient {
    manager: TokenManager,
    base_url: String,
    token_timeout: Option<Duration>,
}

impl ApiClient {
    /// Client for the configured `apiBaseUrl`.
    pub fn new(manager: TokenManager) -> Result<Self, TokenError> {
        let base_url = manager
            .config()
            .api_base_url
            .clone()
            .ok_or_else(|| TokenError::ConfigError {
                path: "<config>".into(),
                detail: "Missing 'apiBaseUrl' for API requests".into(),
            })?;
        Ok(Self::with_base_url(manager, base_url))
    }

    pub fn with_base_url(manager: TokenManager, base_url: impl Into<String>) -> Self {
        Self {
            manager,
            base_url: base_url.into(),
            token_timeout: None,
        }
    }

    /// Bound how long a request may wait for a token refresh.
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = Some(timeout);
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send a request, retrying once with a refreshed token on 401.
    ///
    /// Any other status comes back untouched for the caller to interpret.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, TokenError> {
        let token = self.manager.ensure_fresh(self.token_timeout).await?;
        let resp = self.send(&method, path, body, &token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::warn!("{method} {path} rejected with 401; refreshing credentials");
        let token = self
            .manager
            .refresh_rejected(&token, self.token_timeout)
            .await?;
        let retry = self.send(&method, path, body, &token).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            tracing::error!("{method} {path} still rejected after refresh");
            return Err(TokenError::AuthenticationRejected {
                path: path.to_string(),
            });
        }
        Ok(retry)
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: &str,
    ) -> Result<reqwest::Response, TokenError> {
        let mut req = self
            .manager
            .http()
            .request(method.clone(), self.url(path))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }
        tracing::debug!("{method} {path}");
        Ok(req.send().await?)
    }
}
