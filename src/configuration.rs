use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;

use crate::auth::{RefreshPolicy, UnknownExpiry};

#[derive(serde::Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub refresh: RefreshSettings,
    pub storage: StorageSettings,
}

/// Backend location and endpoint paths
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_ms: u64,
    pub login_path: String,
    pub register_path: String,
    pub refresh_path: String,
    pub session_path: String,
    pub change_password_path: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001/api/be".to_string(),
            timeout_ms: 10_000,
            login_path: "/v1/auth/login".to_string(),
            register_path: "/v1/auth/register".to_string(),
            refresh_path: "/v1/auth/refresh".to_string(),
            session_path: "/v1/auth/session".to_string(),
            change_password_path: "/v1/auth/change-password".to_string(),
        }
    }
}

impl ApiSettings {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Token refresh settings
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RefreshSettings {
    pub lead_ms: u64,         // refresh this long before expiry (2 minutes)
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub min_schedule_delay_ms: u64,
    pub unknown_expiry: UnknownExpiry,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            lead_ms: 2 * 60 * 1000,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30 * 1000,
            jitter_ms: 250,
            min_schedule_delay_ms: 5_000,
            unknown_expiry: UnknownExpiry::AwaitUnauthorized,
        }
    }
}

impl From<&RefreshSettings> for RefreshPolicy {
    fn from(settings: &RefreshSettings) -> Self {
        RefreshPolicy {
            lead: Duration::from_millis(settings.lead_ms),
            max_retries: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            min_schedule_delay: Duration::from_millis(settings.min_schedule_delay_ms),
            unknown_expiry: settings.unknown_expiry,
        }
    }
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Memory,
    File,
}

/// Where credentials persist between runs
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: PathBuf::from(".authkeeper/profile.json"),
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_refresh_policy() {
        let policy = RefreshPolicy::from(&RefreshSettings::default());
        assert_eq!(policy.lead, Duration::from_secs(120));
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.unknown_expiry, UnknownExpiry::AwaitUnauthorized);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let api = ApiSettings {
            base_url: "http://localhost:3001/api/be/".to_string(),
            ..Default::default()
        };
        assert_eq!(api.url(&api.refresh_path), "http://localhost:3001/api/be/v1/auth/refresh");
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "refresh": { "max_retries": 5, "unknown_expiry": "refresh_immediately" }
        }))
        .expect("Failed to deserialize settings");

        assert_eq!(settings.refresh.max_retries, 5);
        assert_eq!(settings.refresh.lead_ms, 120_000);
        assert_eq!(settings.refresh.unknown_expiry, UnknownExpiry::RefreshImmediately);
        assert_eq!(settings.storage.kind, StorageKind::Memory);
    }
}
