/// Authenticated request pipeline
///
/// Wraps every outgoing API call:
/// 1. Waits for a refresh when the stored token is about to expire
/// 2. Attaches `Authorization: Bearer <token>` when a token is stored
/// 3. On 401, refreshes once and resubmits the request once
///
/// The refresh endpoint itself is exempt from 1 and 3.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::{decode_response, error_for_response};
use crate::auth::{now_ms, RefreshCoordinator};
use crate::configuration::ApiSettings;
use crate::error::{ApiError, AppError, AuthError};

#[derive(Clone)]
pub struct AuthenticatedClient {
    http_client: reqwest::Client,
    settings: ApiSettings,
    coordinator: RefreshCoordinator,
}

impl AuthenticatedClient {
    pub fn new(settings: ApiSettings, http_client: reqwest::Client, coordinator: RefreshCoordinator) -> Self {
        Self {
            http_client,
            settings,
            coordinator,
        }
    }

    /// Request builder for `path` under the configured base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client.request(method, self.settings.url(path))
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, AppError> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Run `request` through the pipeline.
    ///
    /// Non-401 responses are returned as-is, whatever their status.
    pub async fn execute(&self, request: Request) -> Result<Response, AppError> {
        let exempt = self.is_refresh_call(&request);
        if exempt {
            return self.send_with_token(request, None).await;
        }

        if self.refresh_due() {
            tracing::debug!(url = %request.url(), "Access token near expiry, refreshing before request");
            self.coordinator.refresh().await?;
        }

        let method = request.method().clone();
        let url = request.url().clone();
        let retry = request.try_clone();

        let sent_token = self.coordinator.access_token();
        let response = self.send_with_token(request, sent_token.clone()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!(method = %method, url = %url, "Request unauthorized, refreshing token");
        let Some(retry) = retry else {
            return Err(ApiError::NotReplayable.into());
        };

        // Another request may already have replaced the token this one carried.
        let token = match self.coordinator.access_token() {
            Some(current) if sent_token.as_ref() != Some(&current) && !self.coordinator.is_refreshing() => current,
            _ => self.coordinator.refresh().await?,
        };
        let response = self.send_with_token(retry, Some(token)).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(method = %method, url = %url, "Request still unauthorized after refresh");
            let err = AuthError::AuthFailureOnRequest;
            self.coordinator.end_session(&err);
            return Err(err.into());
        }

        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Ok(decode_response(response).await?)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, AppError> {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        Ok(decode_response(response).await?)
    }

    /// POST where only success matters; the body is ignored.
    pub async fn post_unit<B: Serialize>(&self, path: &str, body: &B) -> Result<(), AppError> {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        if !response.status().is_success() {
            return Err(error_for_response(response).await.into());
        }
        Ok(())
    }

    fn is_refresh_call(&self, request: &Request) -> bool {
        request.url().path().ends_with(self.settings.refresh_path.as_str())
    }

    fn refresh_due(&self) -> bool {
        if self.coordinator.is_refreshing() {
            return true;
        }
        match self.coordinator.store().get() {
            Some(pair) => self
                .coordinator
                .policy()
                .needs_proactive_refresh(pair.access_token_expires_at_ms, now_ms()),
            // No credentials: go out unauthenticated and let the server decide.
            None => false,
        }
    }

    async fn send_with_token(&self, mut request: Request, token: Option<String>) -> Result<Response, AppError> {
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| AppError::Internal(format!("Access token is not a valid header: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        self.http_client.execute(request).await.map_err(|e| {
            tracing::error!(error = %e, "Request failed");
            AppError::from(e)
        })
    }
}
