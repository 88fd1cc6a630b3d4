use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::TokenError;
use crate::oauth::callback::{html_page, read_request, write_response, RequestLine};
use crate::oauth::{AuthorizationCodeExchanger, TokenManager};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A response before it is written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: &'static str,
    pub content_type: &'static str,
    pub location: Option<String>,
    pub body: String,
}

impl Reply {
    fn json(status: &'static str, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            location: None,
            body: value.to_string(),
        }
    }

    fn html(status: &'static str, title: &str, message: &str) -> Self {
        Self {
            status,
            content_type: "text/html",
            location: None,
            body: html_page(title, message),
        }
    }

    fn not_found() -> Self {
        Self {
            status: "404 Not Found",
            content_type: "text/plain",
            location: None,
            body: "not found".into(),
        }
    }
}

/// Start, callback and status endpoints in front of the manager.
pub struct StatusServer {
    manager: TokenManager,
    exchanger: AuthorizationCodeExchanger,
    callback_path: String,
}

impl StatusServer {
    pub fn new(manager: TokenManager, callback_path: impl Into<String>) -> Self {
        Self {
            exchanger: AuthorizationCodeExchanger::new(manager.clone()),
            manager,
            callback_path: callback_path.into(),
        }
    }

    pub fn exchanger(&self) -> &AuthorizationCodeExchanger {
        &self.exchanger
    }

    /// Accept connections until the task is dropped.
    ///
    /// A failed accept (fd exhaustion and the like) is logged and retried
    /// after a short pause; it never ends the loop.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), TokenError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Status server listening on http://{addr}");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let request = match read_request(&mut stream).await {
                Ok(Some(request)) => request,
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!("Failed to read request from {peer}: {e}");
                    return;
                }
            };
            let reply = server.handle(&request).await;
            let extra: Vec<(&str, &str)> = reply
                .location
                .as_deref()
                .map(|loc| vec![("Location", loc)])
                .unwrap_or_default();
            if let Err(e) = write_response(
                &mut stream,
                reply.status,
                reply.content_type,
                &extra,
                &reply.body,
            )
            .await
            {
                tracing::debug!("Failed to write response to {peer}: {e}");
            }
        });
    }

    pub async fn handle(&self, request: &RequestLine) -> Reply {
        if request.method != "GET" {
            return Reply::not_found();
        }
        match request.path.as_str() {
            "/status" => match serde_json::to_value(self.manager.status()) {
                Ok(value) => Reply::json("200 OK", &value),
                Err(e) => Reply::json(
                    "500 Internal Server Error",
                    &serde_json::json!({ "error": e.to_string() }),
                ),
            },
            "/auth/start" => match self.exchanger.begin() {
                Ok(req) => Reply {
                    status: "302 Found",
                    content_type: "text/plain",
                    location: Some(req.url),
                    body: String::new(),
                },
                Err(e) => Reply::json("500 Internal Server Error", &e.to_json()),
            },
            path if path == self.callback_path => self.handle_callback(request).await,
            _ => Reply::not_found(),
        }
    }

    async fn handle_callback(&self, request: &RequestLine) -> Reply {
        let result = match request.callback_params() {
            Ok(params) => self.exchanger.complete(&params.code, &params.state).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => Reply::html(
                "200 OK",
                "Authorization complete",
                &format!(
                    "Credentials stored. Access token valid until {}.",
                    record
                        .expires_at()
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "unknown".into())
                ),
            ),
            Err(e) => {
                tracing::warn!("OAuth callback failed: {e}");
                let status = match e {
                    TokenError::BootstrapFailed { .. }
                    | TokenError::Network(_)
                    | TokenError::InvalidResponse(_) => "502 Bad Gateway",
                    TokenError::IoError(_) | TokenError::StorageCorrupt { .. } => {
                        "500 Internal Server Error"
                    }
                    _ => "400 Bad Request",
                };
                Reply::html(status, "Authorization failed", &e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::KeeperConfig;
    use crate::oauth::FileCredentialStore;

    fn server(dir: &tempfile::TempDir) -> StatusServer {
        let config = KeeperConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            authorize_url: "https://auth.example.com/login".into(),
            token_url: "http://127.0.0.1:9/token".into(),
            redirect_uri: "http://localhost:8080/oauth/callback".into(),
            ..KeeperConfig::default()
        };
        let store = Arc::new(FileCredentialStore::new(dir.path().join("tokens.json")));
        let manager = TokenManager::new(config, store, reqwest::Client::new(), None);
        StatusServer::new(manager, "/oauth/callback")
    }

    fn get(target: &str) -> RequestLine {
        RequestLine::parse(&format!("GET {target} HTTP/1.1\r\n\r\n")).unwrap()
    }

    #[tokio::test]
    async fn status_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let reply = server(&dir).handle(&get("/status")).await;
        assert_eq!(reply.status, "200 OK");
        let body: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(body["hasCredentials"], false);
        assert_eq!(body["state"], "no_credentials");
        assert!(body["expiresAt"].is_null());
        assert!(body["obtainedAt"].is_null());
    }

    #[tokio::test]
    async fn auth_start_redirects_with_state() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(&dir);
        let reply = srv.handle(&get("/auth/start")).await;
        assert_eq!(reply.status, "302 Found");
        let location = reply.location.unwrap();
        assert!(location.starts_with("https://auth.example.com/login?response_type=code"));
        assert_eq!(srv.exchanger().pending_count(), 1);
    }

    #[tokio::test]
    async fn callback_with_unknown_state_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let reply = server(&dir)
            .handle(&get("/oauth/callback?code=abc123&state=forged"))
            .await;
        assert_eq!(reply.status, "400 Bad Request");
        assert!(!dir.path().join("tokens.json").exists());
    }

    #[tokio::test]
    async fn callback_with_provider_error_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let reply = server(&dir)
            .handle(&get("/oauth/callback?error=access_denied&state=x"))
            .await;
        assert_eq!(reply.status, "400 Bad Request");
        assert!(reply.body.contains("access_denied"));
    }

    #[tokio::test]
    async fn keeps_serving_after_a_broken_connection() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(Arc::new(server(&dir)).run(listener));

        // Connect and hang up without sending a request.
        drop(TcpStream::connect(addr).await.unwrap());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"), "got {response}");
        assert!(response.contains("no_credentials"));
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(&dir);
        assert_eq!(srv.handle(&get("/favicon.ico")).await.status, "404 Not Found");
        let post = RequestLine::parse("POST /status HTTP/1.1\r\n").unwrap();
        assert_eq!(srv.handle(&post).await.status, "404 Not Found");
    }
}
