use std::time::Duration;

use crate::config::load_config;
use crate::error::TokenError;
use crate::oauth::callback::{callback_target, listen_for_callback};
use crate::oauth::AuthorizationCodeExchanger;

/// Default time to wait for the browser to come back.
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 300_000;

/// Run the interactive authorization code bootstrap.
pub async fn run_auth(
    config_path: Option<&str>,
    timeout: Duration,
    open_browser: bool,
) -> Result<(), TokenError> {
    let config = load_config(config_path)?;
    let (bind_addr, callback_path) = callback_target(&config.redirect_uri)?;
    let manager = crate::open_manager(config).await?;
    let exchanger = AuthorizationCodeExchanger::new(manager.clone());

    let request = exchanger.begin()?;
    if !open_browser || webbrowser::open(&request.url).is_err() {
        if open_browser {
            tracing::warn!("Could not open browser automatically");
        }
        eprintln!("Open this URL in your browser to authorize:\n\n{}\n", request.url);
    }

    let params = listen_for_callback(&bind_addr, &callback_path, timeout).await?;
    let record = exchanger.complete(&params.code, &params.state).await?;

    println!(
        "Authentication successful. Credentials saved to {}",
        manager.store().location()
    );
    if let Some(at) = record.expires_at() {
        println!("Access token expires: {}", at.to_rfc3339());
    }
    Ok(())
}
