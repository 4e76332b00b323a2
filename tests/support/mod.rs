#![allow(dead_code)]

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use authkeeper::auth::{MemoryStorage, TokenStore};
use authkeeper::configuration::Settings;
use authkeeper::AuthClient;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};

pub const PASSWORD: &str = "SecurePass123";
const SIGNING_SECRET: &str = "integration-test-secret";

/// In-process stand-in for the auth backend.
pub struct Backend {
    pub refresh_calls: AtomicUsize,
    pub session_calls: AtomicUsize,
    /// Refresh requests answered with 503 before succeeding.
    pub refresh_failures: AtomicUsize,
    /// Reject every bearer token on protected routes.
    pub reject_all: AtomicBool,
    pub refresh_latency: Mutex<Duration>,
    pub refresh_body: Mutex<Value>,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    pub authorization_seen: Mutex<Vec<Option<String>>>,
    valid_tokens: Mutex<HashSet<String>>,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            session_calls: AtomicUsize::new(0),
            refresh_failures: AtomicUsize::new(0),
            reject_all: AtomicBool::new(false),
            refresh_latency: Mutex::new(Duration::from_millis(50)),
            refresh_body: Mutex::new(json!({
                "accessToken": "A2",
                "refreshToken": "R2",
                "expiresIn": 3600
            })),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            authorization_seen: Mutex::new(Vec::new()),
            valid_tokens: Mutex::new(HashSet::new()),
        }
    }
}

impl Backend {
    pub fn accept_token(&self, token: &str) {
        self.valid_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn set_refresh_body(&self, body: Value) {
        *self.refresh_body.lock().unwrap() = body;
    }

    pub fn authorization_seen(&self) -> Vec<Option<String>> {
        self.authorization_seen.lock().unwrap().clone()
    }

    fn issue_access_token(&self, email: &str) -> String {
        let token = mint_token(email, 3600);
        self.accept_token(&token);
        token
    }

    fn is_authorized(&self, request: &HttpRequest) -> bool {
        let token = request
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);
        self.authorization_seen.lock().unwrap().push(token.clone());

        !self.reject_all.load(Ordering::SeqCst)
            && token.map_or(false, |t| self.valid_tokens.lock().unwrap().contains(&t))
    }
}

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// HS256 token with an `exp` claim `expires_in_secs` from now.
pub fn mint_token(subject: &str, expires_in_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = TestClaims {
        sub: subject.to_string(),
        exp: now + expires_in_secs,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SIGNING_SECRET.as_bytes()),
    )
    .expect("Failed to mint token")
}

fn user_json() -> Value {
    json!({ "id": 1, "email": "alice@example.com", "name": "Alice" })
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({
        "success": false,
        "message": "Invalid or expired token",
        "code": "TOKEN_INVALID"
    }))
}

async fn login(body: web::Json<Value>, backend: web::Data<Backend>) -> HttpResponse {
    if body["password"] != PASSWORD {
        return HttpResponse::Unauthorized().json(json!({
            "success": false,
            "message": "Invalid username or password"
        }));
    }

    let token = backend.issue_access_token("alice@example.com");
    HttpResponse::Ok().json(json!({
        "success": true,
        "data": { "accessToken": token, "refreshToken": "R1", "user": user_json() }
    }))
}

async fn register(body: web::Json<Value>, backend: web::Data<Backend>) -> HttpResponse {
    if body["email"] == "taken@example.com" {
        return HttpResponse::BadRequest().json(json!({ "error": "Email already registered" }));
    }

    let token = backend.issue_access_token("alice@example.com");
    // Bare payload, no envelope
    HttpResponse::Created().json(json!({
        "accessToken": token,
        "refreshToken": "R1",
        "expiresIn": 900,
        "user": user_json()
    }))
}

async fn refresh(body: web::Json<Value>, backend: web::Data<Backend>) -> HttpResponse {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let latency = *backend.refresh_latency.lock().unwrap();
    tokio::time::sleep(latency).await;

    let Some(refresh_token) = body["refreshToken"].as_str().filter(|t| !t.is_empty()) else {
        return HttpResponse::BadRequest().json(json!({ "message": "refreshToken is required" }));
    };
    backend
        .refresh_tokens_seen
        .lock()
        .unwrap()
        .push(refresh_token.to_string());

    let failing = backend
        .refresh_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return HttpResponse::ServiceUnavailable().json(json!({ "message": "Service unavailable" }));
    }

    let payload = backend.refresh_body.lock().unwrap().clone();
    if let Some(token) = payload["accessToken"].as_str() {
        backend.accept_token(token);
    }
    HttpResponse::Ok().json(json!({ "success": true, "data": payload }))
}

async fn session(request: HttpRequest, backend: web::Data<Backend>) -> HttpResponse {
    backend.session_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.is_authorized(&request) {
        return unauthorized();
    }
    HttpResponse::Ok().json(json!({ "success": true, "data": user_json() }))
}

async fn change_password(request: HttpRequest, body: web::Json<Value>, backend: web::Data<Backend>) -> HttpResponse {
    if !backend.is_authorized(&request) {
        return unauthorized();
    }
    if body["oldPassword"] != PASSWORD {
        return HttpResponse::BadRequest().json(json!({ "message": "Current password is incorrect" }));
    }
    HttpResponse::Ok().json(json!({ "success": true }))
}

pub struct TestApp {
    pub address: String,
    pub backend: Arc<Backend>,
}

impl TestApp {
    /// Settings pointing at this backend, with short retry delays.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.api.base_url = self.address.clone();
        settings.refresh.base_delay_ms = 10;
        settings.refresh.max_delay_ms = 50;
        settings.refresh.jitter_ms = 0;
        settings
    }

    /// A client over fresh in-memory storage, plus a handle on that storage.
    pub fn client(&self) -> (AuthClient, TokenStore) {
        let storage = Arc::new(MemoryStorage::new());
        let client = AuthClient::with_storage(&self.settings(), storage.clone()).expect("Failed to build client");
        (client, TokenStore::new(storage))
    }

    pub fn refresh_calls(&self) -> usize {
        self.backend.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn session_calls(&self) -> usize {
        self.backend.session_calls.load(Ordering::SeqCst)
    }
}

pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let backend = Arc::new(Backend::default());
    let data = web::Data::from(backend.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/v1/auth/login", web::post().to(login))
            .route("/v1/auth/register", web::post().to(register))
            .route("/v1/auth/refresh", web::post().to(refresh))
            .route("/v1/auth/session", web::get().to(session))
            .route("/v1/auth/change-password", web::post().to(change_password))
    })
    .workers(1)
    .listen(listener)
    .expect("Failed to bind address")
    .run();
    let _ = tokio::spawn(server);

    TestApp { address, backend }
}
