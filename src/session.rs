/// Session State
///
/// Observable authentication state for the UI. Consumers read snapshots or
/// subscribe to changes; only the transition methods below mutate it.

use tokio::sync::{broadcast, watch};

use crate::api::UserProfile;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub user: Option<UserProfile>,
}

/// Lifecycle notifications outside the state snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// New credentials were stored by login, register or refresh.
    TokensUpdated,
    /// The session ended; the UI should navigate to its login view.
    LoginRequired { reason: String },
}

#[derive(Clone)]
pub struct SessionStore {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (events, _) = broadcast::channel(16);
        Self { state, events }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Pending: a network-backed operation started.
    pub fn begin(&self) {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    /// Success of login or register.
    pub fn authenticated(&self, user: Option<UserProfile>) {
        self.state.send_modify(|s| {
            s.is_loading = false;
            s.is_authenticated = true;
            s.user = user;
            s.error = None;
        });
        self.emit(AuthEvent::TokensUpdated);
    }

    /// Success of a token refresh; the known user is kept.
    pub fn refreshed(&self) {
        self.state.send_modify(|s| {
            s.is_loading = false;
            s.is_authenticated = true;
            s.error = None;
        });
        self.emit(AuthEvent::TokensUpdated);
    }

    /// Failure of any network-backed operation.
    pub fn failed(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.send_modify(|s| {
            s.is_loading = false;
            s.is_authenticated = false;
            s.user = None;
            s.error = Some(message);
        });
    }

    /// Terminal failure: record the reason and ask the UI to show the login view.
    pub fn login_required(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.failed(reason.clone());
        self.emit(AuthEvent::LoginRequired { reason });
    }

    /// Result of reading persisted credentials at startup.
    pub fn restored(&self, has_credentials: bool) {
        self.state.send_modify(|s| {
            s.is_loading = false;
            s.is_authenticated = has_credentials;
            if !has_credentials {
                s.user = None;
            }
        });
    }

    /// Logout: back to the initial state.
    pub fn reset(&self) {
        self.state.send_replace(SessionState::default());
    }

    pub fn clear_error(&self) {
        self.state.send_modify(|s| s.error = None);
    }

    /// Authenticated iff the backend knows the user.
    pub fn set_user(&self, user: Option<UserProfile>) {
        self.state.send_modify(|s| {
            s.is_authenticated = user.is_some();
            s.user = user;
        });
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
