/// Authentication module
///
/// Client-side token lifecycle: claim decoding, durable credential storage,
/// expiry policy and the refresh coordinator that keeps tokens fresh.

mod claims;
mod coordinator;
mod policy;
mod token_store;

use async_trait::async_trait;

use crate::error::AuthError;

pub use claims::parse_jwt_exp_ms;
pub use claims::Claims;
pub use coordinator::RefreshCoordinator;
pub use policy::{backoff_delay, is_expired, now_ms, should_proactively_refresh};
pub use policy::{RefreshPolicy, UnknownExpiry};
pub use token_store::{CredentialPair, FileStorage, KeyValueStorage, MemoryStorage, TokenStore};
pub use token_store::{CREDENTIALS_KEY, LEGACY_KEYS};

/// The refresh network call, exchanging a refresh token for new credentials.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, AuthError>;
}
