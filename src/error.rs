/// Error Handling Module
///
/// One error type per concern, folded into `AppError` for callers:
/// 1. Authentication lifecycle errors (shared by every refresh waiter)
/// 2. Backend API errors
/// 3. Durable storage errors
/// 4. Unified application error with conversions
/// 5. Error context for structured logging

use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. AUTHENTICATION LIFECYCLE ERRORS
/// ============================================================================

/// Errors produced by the refresh coordinator and the request pipeline.
///
/// `Clone` because a single refresh outcome is delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No refresh token in storage; terminal without a network call.
    NoRefreshToken,
    /// A single refresh attempt failed. Retried by the coordinator.
    RefreshNetworkFailure(String),
    /// Every refresh attempt failed; the session has been cleared.
    RefreshExhausted { attempts: u32 },
    /// A request was rejected with 401 and could not be recovered.
    AuthFailureOnRequest,
    /// Login or registration was rejected by the backend.
    InvalidCredentials(String),
    /// The refresh belonged to a session that has since been logged out or replaced.
    Superseded,
}

impl AuthError {
    /// Terminal errors end the session and require a new login.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::NoRefreshToken
                | AuthError::RefreshExhausted { .. }
                | AuthError::AuthFailureOnRequest
        )
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::NoRefreshToken => write!(f, "No refresh token found"),
            AuthError::RefreshNetworkFailure(msg) => write!(f, "Refresh token failed: {}", msg),
            AuthError::RefreshExhausted { attempts } => {
                write!(f, "Refresh token failed after {} attempts", attempts)
            }
            AuthError::AuthFailureOnRequest => write!(f, "Request was not authorized"),
            AuthError::InvalidCredentials(msg) => write!(f, "Invalid credentials: {}", msg),
            AuthError::Superseded => write!(f, "Session ended during refresh"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. BACKEND API ERRORS
/// ============================================================================

#[derive(Debug, Clone)]
pub enum ApiError {
    /// Connection, timeout or other transport failure.
    Transport(String),
    /// The backend answered with a non-success status.
    Status { status: u16, message: String },
    /// The response body did not match the expected shape.
    Decode(String),
    /// The request body cannot be replayed after a refresh.
    NotReplayable,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(msg) => write!(f, "Network error: {}", msg),
            ApiError::Status { status, message } => {
                write!(f, "Backend returned {}: {}", status, message)
            }
            ApiError::Decode(msg) => write!(f, "Unexpected response body: {}", msg),
            ApiError::NotReplayable => write!(f, "Request body cannot be retried"),
        }
    }
}

impl StdError for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// ============================================================================
/// 3. STORAGE ERRORS
/// ============================================================================

#[derive(Debug)]
pub enum StorageError {
    Io(String),
    Serialization(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(msg) => write!(f, "Storage I/O error: {}", msg),
            StorageError::Serialization(msg) => write!(f, "Storage serialization error: {}", msg),
        }
    }
}

impl StdError for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// ============================================================================
/// 4. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    Api(ApiError),
    Storage(StorageError),
    Config(String),
    Internal(String),
}

impl AppError {
    /// Whether the session ended and the user must log in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, AppError::Auth(e) if e.is_terminal())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Api(e) => write!(f, "{}", e),
            AppError::Storage(e) => write!(f, "{}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError::Api(err)
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Api(err.into())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Api(ApiError::Decode(err.to_string()))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

// ============================================================================
// 5. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Error context for structured logging of session operations
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn log_error(&self, error: &AppError) {
        match error {
            AppError::Auth(_) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    error = %error,
                    "Authentication error"
                );
            }
            AppError::Api(_) => {
                tracing::error!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    error = %error,
                    "Backend error"
                );
            }
            AppError::Storage(_) | AppError::Config(_) | AppError::Internal(_) => {
                tracing::error!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    started_at = %self.timestamp.to_rfc3339(),
                    error = %error,
                    "Internal error"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::RefreshExhausted { attempts: 3 };
        assert_eq!(err.to_string(), "Refresh token failed after 3 attempts");
        assert_eq!(AuthError::NoRefreshToken.to_string(), "No refresh token found");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(AuthError::NoRefreshToken.is_terminal());
        assert!(AuthError::RefreshExhausted { attempts: 3 }.is_terminal());
        assert!(AuthError::AuthFailureOnRequest.is_terminal());
        assert!(!AuthError::RefreshNetworkFailure("timeout".to_string()).is_terminal());
        assert!(!AuthError::Superseded.is_terminal());
    }

    #[test]
    fn test_app_error_conversion() {
        let app_err: AppError = AuthError::NoRefreshToken.into();
        assert!(app_err.requires_login());

        let app_err: AppError = ApiError::Transport("refused".to_string()).into();
        match app_err {
            AppError::Api(ApiError::Transport(_)) => (),
            _ => panic!("Expected Api error"),
        }
    }

    #[test]
    fn test_error_context_creation() {
        let ctx = ErrorContext::new("user_login");
        assert_eq!(ctx.operation, "user_login");
        assert_eq!(ctx.request_id.len(), 36);
    }
}
