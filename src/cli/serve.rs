use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::load_config;
use crate::error::TokenError;
use crate::oauth::callback::callback_target;
use crate::scheduler::RefreshScheduler;
use crate::server::StatusServer;

/// Keep credentials warm and expose the status/auth endpoints until Ctrl-C.
pub async fn run_serve(config_path: Option<&str>) -> Result<(), TokenError> {
    let config = load_config(config_path)?;
    let (_, callback_path) = callback_target(&config.redirect_uri)?;
    let listen = config.listen_addr().to_string();
    let interval = config.refresh_interval();
    let timeout = config.request_timeout();

    let manager = crate::open_manager(config).await?;
    let scheduler = RefreshScheduler::new(manager.clone(), interval)
        .with_timeout(timeout)
        .spawn();

    let listener = TcpListener::bind(&listen).await?;
    let server = Arc::new(StatusServer::new(manager, callback_path));

    let result = tokio::select! {
        res = server.run(listener) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    };
    scheduler.abort();
    result
}
