pub mod bootstrap;
pub mod callback;
pub mod manager;
pub mod record;
pub mod state;
pub mod store;
pub mod token;

pub use bootstrap::{AuthorizationCodeExchanger, AuthorizationRequest};
pub use callback::{listen_for_callback, CallbackParams};
pub use manager::{ManagerState, TokenManager, TokenStatus};
pub use record::{Freshness, TokenRecord, TokenResponse};
pub use store::{CredentialStore, FileCredentialStore};
pub use token::{exchange_code, http_client, refresh_grant, GrantError};
