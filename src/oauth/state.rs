use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::config::KeeperConfig;
use crate::error::TokenError;

/// Unpredictable anti-CSRF value carried through the authorization redirect.
pub fn generate_state() -> String {
    let mut buf = [0u8; 32];
    rand::Rng::fill_bytes(&mut rand::rng(), &mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Browser URL for the authorization code grant.
pub fn build_authorize_url(config: &KeeperConfig, state: &str) -> Result<String, TokenError> {
    let mut url = reqwest::Url::parse(&config.authorize_url).map_err(|e| {
        TokenError::ConfigError {
            path: "<config>".into(),
            detail: format!("Invalid authorizeUrl '{}': {e}", config.authorize_url),
        }
    })?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri);
        if !config.scope.trim().is_empty() {
            query.append_pair("scope", &config.scope);
        }
        query.append_pair("state", state);
        for (key, value) in &config.extra_auth_params {
            query.append_pair(key, value);
        }
    }

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KeeperConfig {
        KeeperConfig {
            client_id: "my-client".into(),
            authorize_url: "https://auth.example.com/login".into(),
            redirect_uri: "http://localhost:8080/oauth/callback".into(),
            scope: "openid profile".into(),
            ..KeeperConfig::default()
        }
    }

    #[test]
    fn state_length_and_charset() {
        let state = generate_state();
        // 32 bytes base64url-encoded without padding
        assert_eq!(state.len(), 43);
        for ch in state.chars() {
            assert!(
                ch.is_ascii_alphanumeric() || ch == '-' || ch == '_',
                "Invalid char in state: '{ch}'"
            );
        }
    }

    #[test]
    fn state_is_unique() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn authorize_url_carries_all_parameters() {
        let url = build_authorize_url(&config(), "xyz").unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("response_type".into(), "code".into()),
                ("client_id".into(), "my-client".into()),
                ("redirect_uri".into(), "http://localhost:8080/oauth/callback".into()),
                ("scope".into(), "openid profile".into()),
                ("state".into(), "xyz".into()),
            ]
        );
        assert!(url.starts_with("https://auth.example.com/login?"));
    }

    #[test]
    fn authorize_url_omits_empty_scope_and_appends_extras() {
        let mut cfg = config();
        cfg.scope = String::new();
        cfg.extra_auth_params
            .insert("prompt".into(), "consent".into());
        let url = build_authorize_url(&cfg, "s").unwrap();
        assert!(!url.contains("scope="));
        assert!(url.ends_with("&prompt=consent"));
    }

    #[test]
    fn authorize_url_rejects_invalid_base() {
        let mut cfg = config();
        cfg.authorize_url = "::nope".into();
        assert_eq!(build_authorize_url(&cfg, "s").unwrap_err().code(), "config_error");
    }
}
