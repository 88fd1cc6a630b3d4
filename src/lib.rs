pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod oauth;
pub mod scheduler;
pub mod server;

use std::sync::Arc;

pub use client::ApiClient;
pub use config::{load_config, KeeperConfig};
pub use error::TokenError;
pub use oauth::{
    AuthorizationCodeExchanger, CredentialStore, FileCredentialStore, ManagerState,
    TokenManager, TokenRecord, TokenStatus,
};
pub use scheduler::RefreshScheduler;
pub use server::StatusServer;

/// Build the process-wide manager from config: file store plus shared HTTP client.
pub async fn open_manager(config: KeeperConfig) -> Result<TokenManager, TokenError> {
    let store: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(config.token_file_path()));
    let http = oauth::http_client(&config)?;
    TokenManager::open(config, store, http).await
}
