/// Authentication client
///
/// One explicitly constructed instance per running client. Owns the token
/// store, the refresh coordinator, the session state and the authenticated
/// request pipeline, and exposes the session operations the UI dispatches.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::api::{AuthApi, AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, UserProfile};
use crate::auth::{
    is_expired, now_ms, FileStorage, KeyValueStorage, MemoryStorage, RefreshCoordinator, RefreshPolicy,
    TokenStore, UnknownExpiry,
};
use crate::configuration::{Settings, StorageKind};
use crate::error::{ApiError, AppError, AuthError, ErrorContext};
use crate::interceptor::AuthenticatedClient;
use crate::session::{AuthEvent, SessionState, SessionStore};

#[derive(Clone)]
pub struct AuthClient {
    api: AuthApi,
    store: TokenStore,
    session: SessionStore,
    coordinator: RefreshCoordinator,
    http: AuthenticatedClient,
}

impl AuthClient {
    /// Build a client with the storage profile named in `settings`.
    pub fn build(settings: &Settings) -> Result<Self, AppError> {
        let storage: Arc<dyn KeyValueStorage> = match settings.storage.kind {
            StorageKind::Memory => Arc::new(MemoryStorage::new()),
            StorageKind::File => Arc::new(FileStorage::new(settings.storage.path.clone())),
        };
        Self::with_storage(settings, storage)
    }

    pub fn with_storage(settings: &Settings, storage: Arc<dyn KeyValueStorage>) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.api.timeout())
            .user_agent(concat!("authkeeper/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let api = AuthApi::new(settings.api.clone(), http_client.clone());
        let store = TokenStore::new(storage);
        let session = SessionStore::new();
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            Arc::new(api.clone()),
            session.clone(),
            RefreshPolicy::from(&settings.refresh),
        );
        let http = AuthenticatedClient::new(settings.api.clone(), http_client, coordinator.clone());

        Ok(Self {
            api,
            store,
            session,
            coordinator,
            http,
        })
    }

    pub fn state(&self) -> SessionState {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.session.events()
    }

    /// Pipeline for application API calls.
    pub fn http(&self) -> &AuthenticatedClient {
        &self.http
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    /// A usable access token, refreshing first when needed.
    pub async fn ensure_fresh_token(&self) -> Result<String, AuthError> {
        self.coordinator.ensure_fresh_token().await
    }

    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.coordinator.refresh().await
    }

    /// Restore the session from storage at startup.
    ///
    /// An expired access token is refreshed immediately; otherwise the
    /// session is marked authenticated and the proactive refresh is armed.
    pub async fn hydrate(&self) -> Result<bool, AppError> {
        self.session.begin();

        let pair = match self.store.get() {
            Some(pair) if pair.has_refresh_token() => pair,
            _ => {
                self.session.restored(false);
                return Ok(false);
            }
        };

        let refresh_now = match pair.access_token_expires_at_ms {
            Some(expires_at) => is_expired(Some(expires_at), std::time::Duration::ZERO, now_ms()),
            None => self.coordinator.policy().unknown_expiry == UnknownExpiry::RefreshImmediately,
        };

        if refresh_now {
            // Stays loading until the refresh settles the session.
            tracing::info!("Stored access token expired, refreshing");
            self.coordinator.refresh().await?;
        } else {
            self.session.restored(true);
            self.coordinator.schedule(pair.access_token_expires_at_ms);
        }

        tracing::info!("Session restored from storage");
        Ok(true)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Option<UserProfile>, AppError> {
        let context = ErrorContext::new("user_login");
        self.session.begin();

        let request = LoginRequest {
            username: username.trim().to_string(),
            password: password.to_string(),
        };
        let result = match self.api.login(&request).await {
            Ok(response) => self.accept(response),
            Err(e) => Err(rejected_credentials(e)),
        };

        self.settle(&context, result)
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Option<UserProfile>, AppError> {
        let context = ErrorContext::new("user_registration");
        self.session.begin();

        let request = RegisterRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            name: name.map(str::to_string),
        };
        let result = match self.api.register(&request).await {
            Ok(response) => self.accept(response),
            Err(e) => Err(rejected_credentials(e)),
        };

        self.settle(&context, result)
    }

    /// Drop credentials and return to the initial unauthenticated state.
    pub fn logout(&self) {
        self.coordinator.invalidate();
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear stored credentials on logout");
        }
        self.session.reset();
        tracing::info!("User logged out");
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), AppError> {
        let request = ChangePasswordRequest {
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };
        let path = self.api.settings().change_password_path.clone();
        self.http.post_unit(&path, &request).await.map_err(|e| {
            ErrorContext::new("change_password").log_error(&e);
            e
        })
    }

    /// Fetch the current user from the backend and record it in the session.
    pub async fn load_session(&self) -> Result<UserProfile, AppError> {
        let path = self.api.settings().session_path.clone();
        match self.http.get_json::<UserProfile>(&path).await {
            Ok(user) => {
                self.session.set_user(Some(user.clone()));
                Ok(user)
            }
            Err(e) => {
                ErrorContext::new("load_session").log_error(&e);
                Err(e)
            }
        }
    }

    pub fn clear_error(&self) {
        self.session.clear_error();
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    fn accept(&self, response: AuthResponse) -> Result<Option<UserProfile>, AppError> {
        // Discard any refresh still running against the previous credentials.
        self.coordinator.invalidate();
        let stored = self.store.set(response.credentials(None, now_ms()))?;
        self.session.authenticated(response.user.clone());
        self.coordinator.schedule(stored.access_token_expires_at_ms);
        Ok(response.user)
    }

    fn settle(
        &self,
        context: &ErrorContext,
        result: Result<Option<UserProfile>, AppError>,
    ) -> Result<Option<UserProfile>, AppError> {
        match result {
            Ok(user) => {
                tracing::info!(
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Authenticated successfully"
                );
                Ok(user)
            }
            Err(e) => {
                context.log_error(&e);
                self.session.failed(e.to_string());
                if let Err(clear_err) = self.store.clear() {
                    tracing::error!(error = %clear_err, "Failed to clear stored credentials");
                }
                Err(e)
            }
        }
    }
}

/// 400/401 from login or register means the backend rejected the credentials.
fn rejected_credentials(err: ApiError) -> AppError {
    match err {
        ApiError::Status { status: 400 | 401, message } => AuthError::InvalidCredentials(message).into(),
        other => other.into(),
    }
}
