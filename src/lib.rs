//! Client-side authentication token lifecycle.
//!
//! Persists access/refresh credentials, keeps the access token fresh ahead of
//! expiry, recovers from 401 responses with a single shared refresh, and
//! exposes an observable session state for the UI.

pub mod api;
pub mod auth;
pub mod client;
pub mod configuration;
pub mod error;
pub mod interceptor;
pub mod session;
pub mod telemetry;

pub use client::AuthClient;
pub use error::{AppError, AuthError};
pub use session::{AuthEvent, SessionState};
