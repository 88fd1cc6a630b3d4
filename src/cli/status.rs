use std::io::IsTerminal;

use crate::config::load_config;
use crate::error::TokenError;

use super::output::print_status;

/// Print the manager status without touching the network.
pub async fn run_status(config_path: Option<&str>, json: bool) -> Result<(), TokenError> {
    let config = load_config(config_path)?;
    let manager = crate::open_manager(config).await?;
    let is_tty = std::io::stdout().is_terminal();
    print_status(&manager.status(), &manager.store().location(), json, is_tty);
    Ok(())
}

/// Make sure the stored token is fresh, refreshing now if needed (or if forced).
pub async fn run_refresh(config_path: Option<&str>, force: bool, json: bool) -> Result<(), TokenError> {
    let config = load_config(config_path)?;
    let timeout = config.request_timeout();
    let manager = crate::open_manager(config).await?;

    if force {
        manager.force_refresh(Some(timeout)).await?;
    } else {
        manager.ensure_fresh(Some(timeout)).await?;
    }

    let is_tty = std::io::stdout().is_terminal();
    print_status(&manager.status(), &manager.store().location(), json, is_tty);
    Ok(())
}
