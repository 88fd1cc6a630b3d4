use reqwest::StatusCode;

use crate::config::KeeperConfig;
use crate::error::TokenError;
use crate::oauth::record::TokenResponse;

/// HTTP client shared by the token endpoint calls and the API executor.
pub fn http_client(config: &KeeperConfig) -> Result<reqwest::Client, TokenError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!("tokenkeeper/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(TokenError::from)
}

/// How a token endpoint call went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantError {
    /// The authorization server refused the grant (bad code, invalid_grant, bad client).
    Rejected { status: u16, body: String },
    /// Transport failure or a server-side error worth retrying later.
    Transient(String),
    /// A success status whose body is not a token response.
    Malformed(String),
}

impl std::fmt::Display for GrantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantError::Rejected { status, body } => write!(f, "status {status}: {body}"),
            GrantError::Transient(msg) => write!(f, "{msg}"),
            GrantError::Malformed(msg) => write!(f, "{msg}"),
        }
    }
}

/// `grant_type=authorization_code`
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &KeeperConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, GrantError> {
    post_grant(
        http,
        &config.token_url,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await
}

/// `grant_type=refresh_token`
pub async fn refresh_grant(
    http: &reqwest::Client,
    config: &KeeperConfig,
    refresh_token: &str,
) -> Result<TokenResponse, GrantError> {
    post_grant(
        http,
        &config.token_url,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
        ],
    )
    .await
}

async fn post_grant(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, GrantError> {
    let resp = http
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| GrantError::Transient(format!("Token endpoint request failed: {e}")))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| GrantError::Transient(format!("Failed to read token response: {e}")))?;

    if !status.is_success() {
        return Err(classify_failure(status, body));
    }
    parse_token_body(status, &body)
}

fn classify_failure(status: StatusCode, body: String) -> GrantError {
    let retryable = status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT;
    if retryable {
        GrantError::Transient(format!("Token endpoint returned status {status}: {body}"))
    } else {
        GrantError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

/// Some providers answer 200 with an OAuth error object; that is still a rejection.
fn parse_token_body(status: StatusCode, body: &str) -> Result<TokenResponse, GrantError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| GrantError::Malformed(format!("Failed to parse token response: {e}")))?;

    if value.get("access_token").is_none() && value.get("error").is_some() {
        return Err(GrantError::Rejected {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    let resp: TokenResponse = serde_json::from_value(value)
        .map_err(|e| GrantError::Malformed(format!("Failed to parse token response: {e}")))?;
    resp.validated()
        .map_err(|detail| GrantError::Malformed(format!("Unusable token response: {detail}")))
}
