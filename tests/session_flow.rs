mod support;

use std::time::Duration;

use authkeeper::auth::{now_ms, CredentialPair, FileStorage, TokenStore};
use authkeeper::configuration::StorageKind;
use authkeeper::error::ApiError;
use authkeeper::{AppError, AuthClient, AuthError};
use std::sync::Arc;
use support::{spawn_app, PASSWORD};

// --- Login ---

#[tokio::test]
async fn login_stores_credentials_and_authenticates() {
    let app = spawn_app().await;
    let (client, store) = app.client();

    let now = now_ms();
    let user = client.login("alice@example.com", PASSWORD).await.unwrap().unwrap();

    assert_eq!(user.name.as_deref(), Some("Alice"));
    let state = client.state();
    assert!(state.is_authenticated);
    assert!(!state.is_loading);
    assert_eq!(state.user, Some(user));

    let stored = store.get().unwrap();
    assert_eq!(stored.refresh_token, "R1");
    // Expiry comes from the access token's exp claim
    let expires_at = stored.access_token_expires_at_ms.unwrap();
    assert!((expires_at - (now + 3_600_000)).abs() <= 2_000);

    let delay = client.coordinator().scheduled_delay().unwrap();
    assert!(delay > Duration::from_secs(3_400));
    assert!(delay <= Duration::from_secs(3_480));
}

#[tokio::test]
async fn login_with_wrong_password_reports_invalid_credentials() {
    let app = spawn_app().await;
    let (client, store) = app.client();

    let err = client.login("alice@example.com", "WrongPass999").await.unwrap_err();

    match err {
        AppError::Auth(AuthError::InvalidCredentials(message)) => {
            assert_eq!(message, "Invalid username or password")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let state = client.state();
    assert!(!state.is_authenticated);
    assert!(!state.is_loading);
    assert!(state.error.is_some());
    assert!(store.get().is_none());
}

#[tokio::test]
async fn clear_error_keeps_the_rest_of_the_state() {
    let app = spawn_app().await;
    let (client, _) = app.client();
    let _ = client.login("alice@example.com", "WrongPass999").await;

    client.clear_error();

    let state = client.state();
    assert!(state.error.is_none());
    assert!(!state.is_authenticated);
}

#[tokio::test]
async fn session_watchers_observe_login() {
    let app = spawn_app().await;
    let (client, _) = app.client();
    let mut watcher = client.subscribe();

    client.login("alice@example.com", PASSWORD).await.unwrap();

    assert!(watcher.has_changed().unwrap());
    assert!(watcher.borrow_and_update().is_authenticated);
}

// --- Registration ---

#[tokio::test]
async fn register_accepts_bare_payload() {
    let app = spawn_app().await;
    let (client, store) = app.client();

    let now = now_ms();
    let user = client
        .register("alice@example.com", PASSWORD, Some("Alice"))
        .await
        .unwrap();

    assert_eq!(user.unwrap().id, 1);
    assert!(client.state().is_authenticated);
    let expires_at = store.expires_at_ms().unwrap();
    assert!((expires_at - (now + 900_000)).abs() <= 2_000);
}

#[tokio::test]
async fn password_rules_are_left_to_the_backend() {
    let app = spawn_app().await;
    let (client, _) = app.client();

    client.register("bob@example.com", "short", None).await.unwrap();
    client.change_password(PASSWORD, "x").await.unwrap();

    assert!(client.state().is_authenticated);
}

#[tokio::test]
async fn register_with_taken_email_fails() {
    let app = spawn_app().await;
    let (client, _) = app.client();

    let err = client.register("taken@example.com", PASSWORD, None).await.unwrap_err();

    assert!(matches!(err, AppError::Auth(AuthError::InvalidCredentials(_))));
    assert_eq!(client.state().error.as_deref(), Some("Invalid credentials: Email already registered"));
}

// --- Authenticated operations ---

#[tokio::test]
async fn load_session_after_login_records_user() {
    let app = spawn_app().await;
    let (client, _) = app.client();
    client.login("alice@example.com", PASSWORD).await.unwrap();

    let user = client.load_session().await.unwrap();

    assert_eq!(user.email, "alice@example.com");
    assert_eq!(client.state().user, Some(user));
    assert_eq!(app.refresh_calls(), 0);
}

#[tokio::test]
async fn change_password_succeeds_with_correct_old_password() {
    let app = spawn_app().await;
    let (client, _) = app.client();
    client.login("alice@example.com", PASSWORD).await.unwrap();

    client.change_password(PASSWORD, "NewSecurePass456").await.unwrap();
}

#[tokio::test]
async fn change_password_surfaces_backend_rejection() {
    let app = spawn_app().await;
    let (client, _) = app.client();
    client.login("alice@example.com", PASSWORD).await.unwrap();

    let err = client
        .change_password("NotMyPassword1", "NewSecurePass456")
        .await
        .unwrap_err();

    match err {
        AppError::Api(ApiError::Status { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Current password is incorrect");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Still logged in
    assert!(client.state().is_authenticated);
}

// --- Hydration ---

#[tokio::test]
async fn hydrate_refreshes_expired_token_immediately() {
    let app = spawn_app().await;
    let (client, store) = app.client();
    store
        .set(CredentialPair::new("A1", "R1").with_expiry(Some(now_ms() - 1_000)))
        .unwrap();

    assert!(client.hydrate().await.unwrap());

    assert_eq!(app.refresh_calls(), 1);
    assert_eq!(client.get_access_token().as_deref(), Some("A2"));
    assert!(client.state().is_authenticated);
}

#[tokio::test]
async fn hydrate_with_failing_refresh_requires_login() {
    let app = spawn_app().await;
    app.backend
        .refresh_failures
        .store(10, std::sync::atomic::Ordering::SeqCst);
    let (client, store) = app.client();
    store
        .set(CredentialPair::new("A1", "R1").with_expiry(Some(now_ms() - 1_000)))
        .unwrap();

    let err = client.hydrate().await.unwrap_err();

    assert!(err.requires_login());
    assert!(!client.state().is_authenticated);
    assert!(store.get().is_none());
}

#[tokio::test]
async fn file_profile_survives_restart() {
    let app = spawn_app().await;
    let dir = tempfile::tempdir().unwrap();
    let mut settings = app.settings();
    settings.storage.kind = StorageKind::File;
    settings.storage.path = dir.path().join("profile.json");

    let first = AuthClient::build(&settings).unwrap();
    first.login("alice@example.com", PASSWORD).await.unwrap();
    let token = first.get_access_token().unwrap();
    first.shutdown();
    drop(first);

    let second = AuthClient::build(&settings).unwrap();
    assert!(second.hydrate().await.unwrap());
    assert_eq!(second.get_access_token(), Some(token));
    assert_eq!(app.refresh_calls(), 0);

    second.logout();
    let on_disk = TokenStore::new(Arc::new(FileStorage::new(dir.path().join("profile.json"))));
    assert!(on_disk.get().is_none());
}
