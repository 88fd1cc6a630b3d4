use std::path::{Path, PathBuf};

use crate::error::TokenError;

use super::env::{apply_env_overrides, expand_keeper_config};
use super::types::KeeperConfig;

/// Strip JSONC comments (`//` line and `/* */` block) outside of string literals.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let next = chars.peek().copied();
        match (ch, next) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    // keep line numbers stable for parse errors
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Find the config file to load, highest precedence first.
///
/// 1. `--config` CLI flag
/// 2. `TOKENKEEPER_CONFIG` env var
/// 3. `./config/tokenkeeper.json`
/// 4. `~/.tokenkeeper/tokenkeeper.json` or `~/.tokenkeeper/tokenkeeper.jsonc`
pub fn discover_config_file(cli_config: Option<&str>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(path) = cli_config {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(env_path) = std::env::var("TOKENKEEPER_CONFIG") {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from("./config/tokenkeeper.json"));
    if let Some(home) = dirs::home_dir() {
        let base = home.join(".tokenkeeper");
        candidates.push(base.join("tokenkeeper.json"));
        candidates.push(base.join("tokenkeeper.jsonc"));
    }

    candidates.into_iter().find(|p| p.is_file())
}

fn load_config_file(path: &Path) -> Result<KeeperConfig, TokenError> {
    let content = std::fs::read_to_string(path).map_err(|e| TokenError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Cannot read file: {e}"),
    })?;

    let stripped = strip_jsonc_comments(&content);
    serde_json::from_str::<KeeperConfig>(&stripped).map_err(|e| TokenError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Invalid JSON: {e}"),
    })
}

/// Load, expand, override and validate the process configuration.
///
/// An explicit `--config` path that does not exist is an error; otherwise a
/// missing file just means every value comes from the environment.
pub fn load_config(cli_config: Option<&str>) -> Result<KeeperConfig, TokenError> {
    if let Some(path) = cli_config {
        if !Path::new(path).is_file() {
            return Err(TokenError::ConfigError {
                path: PathBuf::from(path),
                detail: "File not found".into(),
            });
        }
    }

    let (mut config, source) = match discover_config_file(cli_config) {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            (load_config_file(&path)?, path)
        }
        None => (KeeperConfig::default(), PathBuf::from("<env>")),
    };

    expand_keeper_config(&mut config)?;
    apply_env_overrides(&mut config);
    validate(&config, &source)?;
    Ok(config)
}

/// Reject configurations the OAuth flows cannot run with.
pub fn validate(config: &KeeperConfig, source: &Path) -> Result<(), TokenError> {
    let err = |detail: String| TokenError::ConfigError {
        path: source.to_path_buf(),
        detail,
    };

    let required = [
        ("clientId", &config.client_id),
        ("clientSecret", &config.client_secret),
        ("authorizeUrl", &config.authorize_url),
        ("tokenUrl", &config.token_url),
        ("redirectUri", &config.redirect_uri),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(err(format!("Missing required setting '{name}'")));
        }
    }

    let urls = [
        ("authorizeUrl", Some(&config.authorize_url)),
        ("tokenUrl", Some(&config.token_url)),
        ("redirectUri", Some(&config.redirect_uri)),
        ("apiBaseUrl", config.api_base_url.as_ref()),
    ];
    for (name, value) in urls {
        if let Some(url) = value {
            reqwest::Url::parse(url).map_err(|e| err(format!("Invalid URL in '{name}': {e}")))?;
        }
    }

    Ok(())
}
