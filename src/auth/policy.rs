/// Expiry policy
///
/// Pure decisions about token freshness and retry spacing. Every function
/// takes the current time explicitly; `now_ms` supplies it from the wall clock.

use std::time::Duration;

use rand::Rng;

/// What to do with an access token whose expiry cannot be determined.
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownExpiry {
    /// Leave it alone until the backend rejects it with 401.
    #[default]
    AwaitUnauthorized,
    /// Refresh before the next request goes out.
    RefreshImmediately,
}

/// Runtime refresh configuration, built from `RefreshSettings`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPolicy {
    /// Refresh this long before the access token expires.
    pub lead: Duration,
    /// Total refresh attempts before the session is dropped.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// Lower bound for the proactive refresh timer.
    pub min_schedule_delay: Duration,
    pub unknown_expiry: UnknownExpiry,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead: Duration::from_secs(120),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
            min_schedule_delay: Duration::from_secs(5),
            unknown_expiry: UnknownExpiry::AwaitUnauthorized,
        }
    }
}

impl RefreshPolicy {
    /// Whether a request should wait for a refresh before it is sent.
    pub fn needs_proactive_refresh(&self, expires_at_ms: Option<i64>, now: i64) -> bool {
        match expires_at_ms {
            Some(_) => should_proactively_refresh(expires_at_ms, self.lead, now),
            None => self.unknown_expiry == UnknownExpiry::RefreshImmediately,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_delay, self.jitter)
    }

    /// Delay until the proactive refresh for a token expiring at `expires_at_ms`.
    pub fn schedule_delay(&self, expires_at_ms: i64, now: i64) -> Duration {
        let lead_ms = self.lead.as_millis() as i64;
        let until = expires_at_ms.saturating_sub(now).saturating_sub(lead_ms).max(0) as u64;
        Duration::from_millis(until).max(self.min_schedule_delay)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// True when `now + skew >= expires_at`, or when the expiry is unknown.
pub fn is_expired(expires_at_ms: Option<i64>, skew: Duration, now: i64) -> bool {
    match expires_at_ms {
        Some(expires_at) => now.saturating_add(skew.as_millis() as i64) >= expires_at,
        None => true,
    }
}

/// True when the token expires within `lead` of `now`.
///
/// Unknown expiry is never proactively refreshable here; see
/// `RefreshPolicy::needs_proactive_refresh` for the configurable variant.
pub fn should_proactively_refresh(expires_at_ms: Option<i64>, lead: Duration, now: i64) -> bool {
    match expires_at_ms {
        Some(expires_at) => expires_at.saturating_sub(now) <= lead.as_millis() as i64,
        None => false,
    }
}

/// `min(base * 2^attempt, max)` plus uniform jitter in `[0, jitter)`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let capped = base.checked_mul(factor).unwrap_or(max).min(max);

    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return capped;
    }
    capped + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}
