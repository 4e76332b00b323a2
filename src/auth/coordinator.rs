/// Refresh Coordinator
///
/// Serializes every refresh into one logical operation per client:
/// - Concurrent callers join the single in-flight refresh (single-flight)
/// - Failed attempts are retried with exponential backoff
/// - Exhausted retries, or a missing refresh token, end the session
/// - Each stored token arms exactly one proactive refresh timer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinHandle;

use crate::auth::policy::{now_ms, RefreshPolicy};
use crate::auth::token_store::{CredentialPair, TokenStore};
use crate::auth::TokenRefresher;
use crate::error::AuthError;
use crate::session::SessionStore;

type SharedRefresh = Shared<BoxFuture<'static, Result<String, AuthError>>>;

/// Cloneable handle; clones share the same in-flight refresh and timer.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: TokenStore,
    refresher: Arc<dyn TokenRefresher>,
    session: SessionStore,
    policy: RefreshPolicy,
    in_flight: Mutex<Option<InFlight>>,
    timer: Mutex<Option<ScheduledRefresh>>,
    /// Bumped on logout so a refresh finishing afterwards is discarded.
    epoch: AtomicU64,
}

/// The running refresh and the session epoch it belongs to
struct InFlight {
    epoch: u64,
    refresh: SharedRefresh,
}

struct ScheduledRefresh {
    delay: Duration,
    handle: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RefreshCoordinator {
    pub fn new(
        store: TokenStore,
        refresher: Arc<dyn TokenRefresher>,
        session: SessionStore,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                session,
                policy,
                in_flight: Mutex::new(None),
                timer: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.inner.policy
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Current access token without triggering a refresh.
    pub fn access_token(&self) -> Option<String> {
        self.inner.store.access_token()
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    /// Delay of the currently armed proactive refresh, if any.
    pub fn scheduled_delay(&self) -> Option<Duration> {
        lock(&self.inner.timer).as_ref().map(|scheduled| scheduled.delay)
    }

    /// Refresh now, or join the refresh already in flight.
    ///
    /// Every caller waiting at the same time receives the same outcome.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.join_or_start().await
    }

    /// An access token that is not due for proactive refresh.
    ///
    /// Returns the stored token when it is still fresh; otherwise behaves
    /// like `refresh`.
    pub async fn ensure_fresh_token(&self) -> Result<String, AuthError> {
        if !self.is_refreshing() {
            if let Some(pair) = self.inner.store.get() {
                let due = self
                    .inner
                    .policy
                    .needs_proactive_refresh(pair.access_token_expires_at_ms, now_ms());
                if !due {
                    return Ok(pair.access_token);
                }
            }
        }
        self.refresh().await
    }

    /// Arm the proactive refresh for a token expiring at `expires_at_ms`,
    /// replacing any timer armed before.
    pub fn schedule(&self, expires_at_ms: Option<i64>) {
        Inner::arm_timer(&self.inner, expires_at_ms);
    }

    pub fn cancel_scheduled(&self) {
        if let Some(previous) = lock(&self.inner.timer).take() {
            previous.handle.abort();
        }
    }

    /// Logout or new login: forget the timer and detach any refresh still
    /// in flight. The detached refresh neither stores tokens nor ends the
    /// session; later callers start a new one.
    pub fn invalidate(&self) {
        {
            let mut in_flight = lock(&self.inner.in_flight);
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            in_flight.take();
        }
        self.cancel_scheduled();
    }

    /// Terminal failure: clear credentials, reset the session and ask for login.
    pub fn end_session(&self, reason: &AuthError) {
        self.inner.terminate(reason);
    }

    pub fn shutdown(&self) {
        self.cancel_scheduled();
    }

    fn join_or_start(&self) -> SharedRefresh {
        // Check and transition happen under one lock with no await in between.
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(existing) = in_flight.as_ref() {
            tracing::debug!("Joining in-flight token refresh");
            return existing.refresh.clone();
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = Inner::run_refresh(&inner, epoch).await;
            inner.release(epoch);
            outcome
        });

        let weak = Arc::downgrade(&self.inner);
        let shared = task
            .map(move |joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.release(epoch);
                    }
                    tracing::error!(error = %e, "Refresh task did not complete");
                    Err(AuthError::RefreshNetworkFailure(e.to_string()))
                }
            })
            .boxed()
            .shared();

        *in_flight = Some(InFlight {
            epoch,
            refresh: shared.clone(),
        });
        shared
    }
}

impl Inner {
    async fn run_refresh(inner: &Arc<Inner>, epoch: u64) -> Result<String, AuthError> {
        let refresh_token = match inner.store.get() {
            Some(pair) if pair.has_refresh_token() => pair.refresh_token,
            _ => {
                tracing::warn!("Refresh requested without a stored refresh token");
                return Err(inner.terminate_if_current(epoch, AuthError::NoRefreshToken));
            }
        };

        let max_attempts = inner.policy.max_retries.max(1);

        for attempt in 0..max_attempts {
            tracing::info!(attempt = attempt + 1, max_attempts, "Refreshing access token");

            let outcome = inner.refresher.refresh(&refresh_token).await;
            if !inner.is_current(epoch) {
                tracing::info!("Session ended during refresh, discarding outcome");
                return Err(AuthError::Superseded);
            }

            let failure = match outcome {
                Ok(pair) => match Inner::commit(inner, epoch, pair) {
                    Ok(token) => {
                        tracing::info!(attempt = attempt + 1, "Access token refreshed");
                        return Ok(token);
                    }
                    Err(AuthError::Superseded) => return Err(AuthError::Superseded),
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };

            tracing::warn!(attempt = attempt + 1, error = %failure, "Refresh attempt failed");

            if attempt + 1 < max_attempts {
                let delay = inner.policy.backoff(attempt);
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off before next refresh attempt");
                tokio::time::sleep(delay).await;
                if !inner.is_current(epoch) {
                    tracing::info!("Session ended during refresh backoff");
                    return Err(AuthError::Superseded);
                }
            }
        }

        Err(inner.terminate_if_current(
            epoch,
            AuthError::RefreshExhausted {
                attempts: max_attempts,
            },
        ))
    }

    /// Store refreshed credentials for session `epoch` and re-arm the timer.
    fn commit(inner: &Arc<Inner>, epoch: u64, pair: CredentialPair) -> Result<String, AuthError> {
        let _in_flight = lock(&inner.in_flight);
        if !inner.is_current(epoch) {
            return Err(AuthError::Superseded);
        }
        let stored = inner
            .store
            .set(pair)
            .map_err(|e| AuthError::RefreshNetworkFailure(e.to_string()))?;
        tracing::debug!(expires_at_ms = ?stored.access_token_expires_at_ms, "Refreshed credentials stored");
        inner.session.refreshed();
        Inner::arm_timer(inner, stored.access_token_expires_at_ms);
        Ok(stored.access_token)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Clear the in-flight slot unless it already belongs to a newer session.
    fn release(&self, epoch: u64) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.as_ref().map_or(false, |current| current.epoch == epoch) {
            in_flight.take();
        }
    }

    /// Terminal failure for the session `epoch`; a stale refresh leaves the
    /// newer session untouched.
    fn terminate_if_current(&self, epoch: u64, err: AuthError) -> AuthError {
        // Epoch bumps happen under this lock.
        let _in_flight = lock(&self.in_flight);
        if !self.is_current(epoch) {
            return AuthError::Superseded;
        }
        self.terminate(&err);
        err
    }

    fn arm_timer(inner: &Arc<Inner>, expires_at_ms: Option<i64>) {
        let mut timer = lock(&inner.timer);
        if let Some(previous) = timer.take() {
            previous.handle.abort();
        }

        let Some(expires_at) = expires_at_ms else {
            tracing::debug!("Access token expiry unknown, no proactive refresh armed");
            return;
        };

        let delay = inner.policy.schedule_delay(expires_at, now_ms());
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            tracing::debug!("Proactive refresh timer fired");
            if let Err(e) = (RefreshCoordinator { inner }).refresh().await {
                tracing::warn!(error = %e, "Proactive refresh failed");
            }
        });

        tracing::debug!(delay_ms = delay.as_millis() as u64, "Proactive refresh armed");
        *timer = Some(ScheduledRefresh { delay, handle });
    }

    fn terminate(&self, reason: &AuthError) {
        tracing::warn!(error = %reason, "Session ended, login required");
        if let Some(previous) = lock(&self.timer).take() {
            previous.handle.abort();
        }
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear stored credentials");
        }
        self.session.login_required(reason.to_string());
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(scheduled) = lock(&self.timer).take() {
            scheduled.handle.abort();
        }
    }
}
