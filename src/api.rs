/// Backend authentication API
///
/// Wire types for the auth endpoints and a thin client for the calls that
/// must not pass through the authenticated request pipeline (login,
/// register and the refresh call itself).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::{now_ms, CredentialPair, TokenRefresher};
use crate::configuration::ApiSettings;
use crate::error::{ApiError, AuthError};

/// Login request; `username` may be a phone number, email or username.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Tokens issued by login, register and refresh
///
/// Expiry may be absolute (`expiresAt`, epoch ms) or relative
/// (`expiresIn`, seconds). Refresh responses may omit the refresh token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl AuthResponse {
    /// Absolute expiry in epoch ms, if the backend stated one.
    pub fn expires_at_ms(&self, now: i64) -> Option<i64> {
        self.expires_at.or_else(|| {
            self.expires_in
                .map(|secs| now.saturating_add(secs.saturating_mul(1000)))
        })
    }

    /// Credentials to persist. `current_refresh_token` is kept when the
    /// response does not rotate it.
    pub fn credentials(&self, current_refresh_token: Option<&str>, now: i64) -> CredentialPair {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .or(current_refresh_token)
            .unwrap_or_default();

        CredentialPair::new(self.access_token.clone(), refresh_token)
            .with_expiry(self.expires_at_ms(now))
    }
}

/// Payloads arrive either wrapped as `{ "data": ... }` or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(data) => data,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Turn a non-success response into `ApiError::Status` with the backend's message.
pub async fn error_for_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body
            }
        });

    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Decode a successful response body, unwrapping the envelope.
pub async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    if !response.status().is_success() {
        return Err(error_for_response(response).await);
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice::<Envelope<T>>(&bytes)
        .map(Envelope::into_inner)
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[derive(Clone)]
pub struct AuthApi {
    http_client: reqwest::Client,
    settings: ApiSettings,
}

impl AuthApi {
    pub fn new(settings: ApiSettings, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        self.post(&self.settings.login_path, request).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        self.post(&self.settings.register_path, request).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        let request = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.post(&self.settings.refresh_path, &request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let url = self.settings.url(path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Auth request failed");
                ApiError::from(e)
            })?;

        decode_response(response).await
    }
}

#[async_trait]
impl TokenRefresher for AuthApi {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, AuthError> {
        let response = self
            .refresh_token(refresh_token)
            .await
            .map_err(|e| AuthError::RefreshNetworkFailure(e.to_string()))?;

        if response.access_token.is_empty() {
            return Err(AuthError::RefreshNetworkFailure(
                "refresh response carried no access token".to_string(),
            ));
        }

        Ok(response.credentials(Some(refresh_token), now_ms()))
    }
}
