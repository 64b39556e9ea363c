//! In-process mock of the authentication and ticket services

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tokens {
    access: String,
    refresh: String,
    issued: u32,
    refresh_calls: u32,
}

/// Handle onto the running mock API
#[derive(Clone)]
pub struct MockApi {
    tokens: Arc<Mutex<Tokens>>,
    refresh_delay: Duration,
}

impl MockApi {
    /// Start the API on a random local port and return it with its base URL
    pub async fn spawn(refresh_delay: Duration) -> anyhow::Result<(Self, String)> {
        let api = Self {
            tokens: Arc::new(Mutex::new(Tokens::default())),
            refresh_delay,
        };

        let app = Router::new()
            .route("/authen-service/sign-in", post(sign_in))
            .route("/authen-service/refresh-token", post(refresh_token))
            .route("/ticket-service/boards/{id}", get(board))
            .with_state(api.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Mock API stopped");
            }
        });

        Ok((api, format!("http://{addr}")))
    }

    /// Invalidate the current access token
    pub fn expire_access_token(&self) {
        self.lock().access = "expired".to_string();
    }

    /// How many times the refresh endpoint was called
    pub fn refresh_calls(&self) -> u32 {
        self.lock().refresh_calls
    }

    fn lock(&self) -> MutexGuard<'_, Tokens> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn issue(tokens: &mut Tokens) -> Value {
    tokens.issued += 1;
    tokens.access = format!("access-{}", tokens.issued);
    tokens.refresh = format!("refresh-{}", tokens.issued);
    json!({ "access_token": tokens.access, "refresh_token": tokens.refresh })
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

async fn sign_in(State(api): State<MockApi>, Json(body): Json<Value>) -> Response {
    if body["password"] != "demo" {
        return error(StatusCode::UNAUTHORIZED, "invalid password");
    }
    Json(issue(&mut api.lock())).into_response()
}

async fn refresh_token(State(api): State<MockApi>, Json(body): Json<Value>) -> Response {
    api.lock().refresh_calls += 1;
    tokio::time::sleep(api.refresh_delay).await;

    let mut tokens = api.lock();
    if body["refresh_token"] != tokens.refresh.as_str() {
        return error(StatusCode::UNAUTHORIZED, "invalid refresh token");
    }
    Json(issue(&mut tokens)).into_response()
}

async fn board(State(api): State<MockApi>, Path(id): Path<u32>, headers: HeaderMap) -> Response {
    let expected = format!("Bearer {}", api.lock().access);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !authorized {
        return error(StatusCode::UNAUTHORIZED, "invalid or expired jwt");
    }
    Json(json!({ "id": id, "name": format!("Board {id}") })).into_response()
}
