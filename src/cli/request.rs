use std::str::FromStr;

use reqwest::Method;

use crate::client::ApiClient;
use crate::config::load_config;
use crate::error::TokenError;

fn parse_method(method: &str) -> Result<Method, TokenError> {
    Method::from_str(&method.to_ascii_uppercase()).map_err(|_| TokenError::ConfigError {
        path: "<args>".into(),
        detail: format!("Invalid HTTP method '{method}'"),
    })
}

fn parse_body(data: Option<&str>) -> Result<Option<serde_json::Value>, TokenError> {
    data.map(|raw| {
        serde_json::from_str(raw).map_err(|e| TokenError::ConfigError {
            path: "<args>".into(),
            detail: format!("--data is not valid JSON: {e}"),
        })
    })
    .transpose()
}

/// Send one authenticated request and print the response.
pub async fn run_request(
    config_path: Option<&str>,
    method: &str,
    path: &str,
    data: Option<&str>,
) -> Result<(), TokenError> {
    let method = parse_method(method)?;
    let body = parse_body(data)?;
    let config = load_config(config_path)?;
    let token_timeout = config.request_timeout();
    let manager = crate::open_manager(config).await?;
    let client = ApiClient::new(manager)?.with_token_timeout(token_timeout);

    let resp = client.execute(method, path, body.as_ref()).await?;
    let status = resp.status();
    let text = resp.text().await?;

    eprintln!("HTTP {status}");
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or(text)),
        Err(_) => println!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_is_case_insensitive() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("Post").unwrap(), Method::POST);
    }

    #[test]
    fn invalid_method_is_rejected() {
        assert!(parse_method("NOT A METHOD").is_err());
    }

    #[test]
    fn body_must_be_json() {
        assert!(parse_body(None).unwrap().is_none());
        assert_eq!(
            parse_body(Some(r#"{"a":1}"#)).unwrap(),
            Some(serde_json::json!({"a": 1}))
        );
        assert!(parse_body(Some("{oops")).unwrap_err().to_string().contains("--data"));
    }
}
