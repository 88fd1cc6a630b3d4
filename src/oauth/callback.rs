use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::TokenError;

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// Minimal view of an HTTP/1.1 request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

impl RequestLine {
    pub fn parse(request: &str) -> Option<Self> {
        let first_line = request.lines().next()?;
        let mut parts = first_line.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };
        Some(Self {
            method,
            path: path.to_string(),
            query,
        })
    }

    /// Turn the redirect query into a code/state pair.
    ///
    /// A provider `error=` takes precedence over everything else.
    pub fn callback_params(&self) -> Result<CallbackParams, TokenError> {
        if let Some(error) = self.query.get("error") {
            let detail = match self.query.get("error_description") {
                Some(desc) => format!("{error}: {desc}"),
                None => error.clone(),
            };
            return Err(TokenError::AuthorizationDenied(detail));
        }
        let code = self
            .query
            .get("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                TokenError::AuthorizationDenied(
                    "No authorization code found in callback request".into(),
                )
            })?;
        let state = self
            .query
            .get("state")
            .cloned()
            .ok_or(TokenError::StateMismatch)?;
        Ok(CallbackParams {
            code: code.clone(),
            state,
        })
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (urldecode(k), urldecode(v)),
            None => (urldecode(pair), String::new()),
        })
        .collect()
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(val) => {
                        out.push(val);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Read one request from a fresh connection.
pub async fn read_request(stream: &mut TcpStream) -> Result<Option<RequestLine>, TokenError> {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    Ok(RequestLine::parse(&request))
}

pub async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &str,
) -> Result<(), TokenError> {
    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

pub fn html_page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body><h1>{title}</h1><p>{message}</p></body></html>"
    )
}

/// Wait for the authorization server to redirect the browser back to us.
///
/// Requests for other paths (favicon probes and the like) get a 404 and the
/// listener keeps waiting until `timeout`.
pub async fn listen_for_callback(
    addr: &str,
    callback_path: &str,
    timeout: Duration,
) -> Result<CallbackParams, TokenError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Waiting for OAuth callback on http://{addr}{callback_path}");

    let accept_loop = async {
        loop {
            let (mut stream, _) = listener.accept().await?;
            let Some(request) = read_request(&mut stream).await? else {
                continue;
            };
            if request.path != callback_path {
                write_response(&mut stream, "404 Not Found", "text/plain", &[], "not found")
                    .await?;
                continue;
            }

            let result = request.callback_params();
            let page = match &result {
                Ok(_) => html_page(
                    "Authorization received",
                    "You can close this window and return to the terminal.",
                ),
                Err(e) => html_page("Authorization failed", &e.to_string()),
            };
            let status = if result.is_ok() { "200 OK" } else { "400 Bad Request" };
            write_response(&mut stream, status, "text/html", &[], &page).await?;
            return result;
        }
    };

    tokio::time::timeout(timeout, accept_loop)
        .await
        .map_err(|_| TokenError::Timeout(timeout))?
}

/// Split a redirect URI into the local bind address and callback path.
pub fn callback_target(redirect_uri: &str) -> Result<(String, String), TokenError> {
    let url = reqwest::Url::parse(redirect_uri).map_err(|e| TokenError::ConfigError {
        path: "<config>".into(),
        detail: format!("Invalid redirectUri '{redirect_uri}': {e}"),
    })?;
    let host = url.host_str().unwrap_or("127.0.0.1");
    let host = if host == "localhost" { "127.0.0.1" } else { host };
    let port = url.port_or_known_default().unwrap_or(80);
    Ok((format!("{host}:{port}"), url.path().to_string()))
}
