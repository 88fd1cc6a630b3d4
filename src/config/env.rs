use std::path::PathBuf;

use crate::error::TokenError;

use super::types::KeeperConfig;

/// Expand environment variable references in a config string.
///
/// Supported syntaxes:
/// - `${VAR}` - replaced with env var value; error if unset
/// - `${VAR:-fallback}` - env var value, or fallback if unset or empty
/// - `$env:VAR` - same as `${VAR}`
pub fn expand_env_vars(input: &str) -> Result<String, TokenError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(body) = after.strip_prefix('{') {
            let close = body.find('}').ok_or_else(|| {
                env_error(format!("Unclosed variable reference: ${{{body}"))
            })?;
            let expr = &body[..close];
            match expr.split_once(":-") {
                Some((name, fallback)) => match std::env::var(name) {
                    Ok(val) if !val.is_empty() => out.push_str(&val),
                    _ => out.push_str(fallback),
                },
                None => out.push_str(&required_var(expr)?),
            }
            rest = &body[close + 1..];
        } else if let Some(body) = after.strip_prefix("env:") {
            let end = body
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(body.len());
            if end == 0 {
                return Err(env_error("Empty variable name in $env: reference".into()));
            }
            out.push_str(&required_var(&body[..end])?);
            rest = &body[end..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn required_var(name: &str) -> Result<String, TokenError> {
    std::env::var(name)
        .map_err(|_| env_error(format!("Environment variable '{name}' is not set")))
}

/// Expand environment references in every string field that may carry one.
pub fn expand_keeper_config(config: &mut KeeperConfig) -> Result<(), TokenError> {
    for field in [
        &mut config.client_id,
        &mut config.client_secret,
        &mut config.authorize_url,
        &mut config.token_url,
        &mut config.redirect_uri,
        &mut config.scope,
    ] {
        *field = expand_env_vars(field)?;
    }
    if let Some(ref mut url) = config.api_base_url {
        *url = expand_env_vars(url)?;
    }
    if let Some(ref mut path) = config.token_file {
        *path = PathBuf::from(expand_env_vars(&path.to_string_lossy())?);
    }
    for value in config.extra_auth_params.values_mut() {
        *value = expand_env_vars(value)?;
    }
    Ok(())
}

/// Overlay the conventional OAuth environment variables onto a loaded config.
///
/// Non-empty variables win over file values so a deployment can keep the
/// secret out of the config file entirely.
pub fn apply_env_overrides(config: &mut KeeperConfig) {
    let overrides: [(&str, &mut String); 6] = [
        ("CLIENT_ID", &mut config.client_id),
        ("CLIENT_SECRET", &mut config.client_secret),
        ("AUTH_URL", &mut config.authorize_url),
        ("TOKEN_URL", &mut config.token_url),
        ("REDIRECT_URI", &mut config.redirect_uri),
        ("SCOPES", &mut config.scope),
    ];
    for (var, field) in overrides {
        if let Ok(val) = std::env::var(var) {
            if !val.is_empty() {
                *field = val;
            }
        }
    }
    if let Ok(val) = std::env::var("API_BASE") {
        if !val.is_empty() {
            config.api_base_url = Some(val);
        }
    }
}

fn env_error(detail: String) -> TokenError {
    TokenError::ConfigError {
        path: PathBuf::from("<env>"),
        detail,
    }
}
