use std::path::PathBuf;
use std::sync::Arc;

use tokenkeeper::{FileCredentialStore, KeeperConfig, TokenManager, TokenRecord};

/// Config whose token endpoint is `server_uri/token` and whose token file lives in `dir`.
pub fn keeper_config(server_uri: &str, dir: &tempfile::TempDir) -> KeeperConfig {
    KeeperConfig {
        client_id: "client-1".into(),
        client_secret: "s3cret".into(),
        authorize_url: format!("{server_uri}/authorize"),
        token_url: format!("{server_uri}/token"),
        redirect_uri: "http://localhost:8080/oauth/callback".into(),
        scope: "read write".into(),
        api_base_url: Some(format!("{server_uri}/api")),
        token_file: Some(dir.path().join("tokens.json")),
        ..KeeperConfig::default()
    }
}

pub fn token_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("tokens.json")
}

/// Manager backed by a file store at the config's token file.
pub fn manager(config: KeeperConfig, initial: Option<TokenRecord>) -> TokenManager {
    let store = Arc::new(FileCredentialStore::new(config.token_file_path()));
    TokenManager::new(config, store, reqwest::Client::new(), initial)
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn record(access: &str, refresh: Option<&str>, expires_in: i64, obtained_at_ms: i64) -> TokenRecord {
    TokenRecord {
        access_token: access.into(),
        refresh_token: refresh.map(Into::into),
        token_type: "Bearer".into(),
        expires_in,
        obtained_at_ms,
    }
}

/// One hour left, well outside the default safety window.
#[allow(dead_code)]
pub fn fresh_record(access: &str, refresh: &str) -> TokenRecord {
    record(access, Some(refresh), 3600, now_ms())
}

/// Obtained two hours ago with a one hour lifetime.
#[allow(dead_code)]
pub fn expired_record(access: &str, refresh: &str) -> TokenRecord {
    record(access, Some(refresh), 3600, now_ms() - 2 * 3600 * 1000)
}

/// Token endpoint success body.
#[allow(dead_code)]
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: i64) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "expires_in": expires_in,
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.into());
    }
    body
}

/// Write `config` as tokenkeeper.json in `dir` and return its path.
#[allow(dead_code)]
pub fn write_config_file(dir: &tempfile::TempDir, config: &KeeperConfig) -> PathBuf {
    let path = dir.path().join("tokenkeeper.json");
    std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
    path
}
