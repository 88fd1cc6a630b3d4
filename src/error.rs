use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("No stored credentials. Run: tokenkeeper auth")]
    MissingCredentials,

    #[error("Callback state does not match any pending authorization request")]
    StateMismatch,

    #[error("Authorization code exchange failed with status {status}: {body}")]
    BootstrapFailed { status: u16, body: String },

    #[error("Authorization server denied the request: {0}")]
    AuthorizationDenied(String),

    #[error("Token refresh rejected: {0}. Run: tokenkeeper auth")]
    RefreshFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid token endpoint response: {0}")]
    InvalidResponse(String),

    #[error("Credential file {} is corrupt: {detail}", path.display())]
    StorageCorrupt { path: PathBuf, detail: String },

    #[error("Timed out after {}ms waiting for a fresh token", .0.as_millis())]
    Timeout(Duration),

    #[error("Request to {path} was rejected after refreshing credentials")]
    AuthenticationRejected { path: String },

    #[error("Error in config {}: {detail}", path.display())]
    ConfigError { path: PathBuf, detail: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TokenError {
    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::MissingCredentials => "missing_credentials",
            TokenError::StateMismatch => "state_mismatch",
            TokenError::BootstrapFailed { .. } => "bootstrap_failed",
            TokenError::AuthorizationDenied(_) => "authorization_denied",
            TokenError::RefreshFailed(_) => "refresh_failed",
            TokenError::Network(_) => "network_error",
            TokenError::InvalidResponse(_) => "invalid_response",
            TokenError::StorageCorrupt { .. } => "storage_corrupt",
            TokenError::Timeout(_) => "timeout",
            TokenError::AuthenticationRejected { .. } => "authentication_rejected",
            TokenError::ConfigError { .. } => "config_error",
            TokenError::IoError(_) => "io_error",
        }
    }

    /// Whether a later attempt may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TokenError::Network(_) | TokenError::InvalidResponse(_) | TokenError::Timeout(_)
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "code": self.code(),
            }
        })
    }
}

impl From<reqwest::Error> for TokenError {
    fn from(e: reqwest::Error) -> Self {
        TokenError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_credentials() {
        assert_eq!(
            TokenError::MissingCredentials.to_string(),
            "No stored credentials. Run: tokenkeeper auth"
        );
    }

    #[test]
    fn display_bootstrap_failed_keeps_body_verbatim() {
        let err = TokenError::BootstrapFailed {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.into(),
        };
        assert_eq!(
            err.to_string(),
            r#"Authorization code exchange failed with status 400: {"error":"invalid_grant"}"#
        );
    }

    #[test]
    fn display_storage_corrupt() {
        let err = TokenError::StorageCorrupt {
            path: PathBuf::from("/var/lib/tokens.json"),
            detail: "expected value at line 1 column 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Credential file /var/lib/tokens.json is corrupt: expected value at line 1 column 1"
        );
    }

    #[test]
    fn display_timeout() {
        let err = TokenError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1500ms waiting for a fresh token");
    }

    #[test]
    fn display_authentication_rejected() {
        let err = TokenError::AuthenticationRejected {
            path: "/v1/sales".into(),
        };
        assert_eq!(
            err.to_string(),
            "Request to /v1/sales was rejected after refreshing credentials"
        );
    }

    #[test]
    fn error_code_mapping_all_variants() {
        assert_eq!(TokenError::MissingCredentials.code(), "missing_credentials");
        assert_eq!(TokenError::StateMismatch.code(), "state_mismatch");
        assert_eq!(
            TokenError::BootstrapFailed {
                status: 400,
                body: String::new()
            }
            .code(),
            "bootstrap_failed"
        );
        assert_eq!(
            TokenError::AuthorizationDenied("access_denied".into()).code(),
            "authorization_denied"
        );
        assert_eq!(TokenError::RefreshFailed("x".into()).code(), "refresh_failed");
        assert_eq!(TokenError::Network("x".into()).code(), "network_error");
        assert_eq!(TokenError::InvalidResponse("x".into()).code(), "invalid_response");
        assert_eq!(
            TokenError::StorageCorrupt {
                path: PathBuf::from("/a"),
                detail: "d".into()
            }
            .code(),
            "storage_corrupt"
        );
        assert_eq!(TokenError::Timeout(Duration::from_secs(1)).code(), "timeout");
        assert_eq!(
            TokenError::AuthenticationRejected { path: "/".into() }.code(),
            "authentication_rejected"
        );
        assert_eq!(
            TokenError::ConfigError {
                path: PathBuf::from("/a"),
                detail: "d".into()
            }
            .code(),
            "config_error"
        );
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "test");
        assert_eq!(TokenError::IoError(io_err).code(), "io_error");
    }

    #[test]
    fn transient_classification() {
        assert!(TokenError::Network("reset".into()).is_transient());
        assert!(TokenError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!TokenError::RefreshFailed("invalid_grant".into()).is_transient());
        assert!(!TokenError::MissingCredentials.is_transient());
    }

    #[test]
    fn error_to_json_structure() {
        let json = TokenError::StateMismatch.to_json();
        let error_obj = json.get("error").expect("should have error key");
        assert_eq!(error_obj["code"], "state_mismatch");
        assert!(error_obj["message"].as_str().unwrap().contains("state"));
    }
}
