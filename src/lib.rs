//! # bearer-relay
//!
//! Authenticated HTTP request pipeline with single-flight token refresh.
//! Async/await, strong typing, tokio-based.
//!
//! Every request carries the current access token as `Authorization: Bearer`.
//! When the API answers 401, exactly one refresh call is made no matter how
//! many requests failed at the same time; every caller waits for it and is
//! replayed once with the new token.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bearer_relay::{ApiClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .build();
//!     let client = ApiClient::new(config)?;
//!
//!     client.auth().sign_in("ada@example.com", "correct horse").await?;
//!     let me = client.auth().me().await?;
//!     println!("Hello, {}", me.name);
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Transparent refresh with [`ApiClient::send`]
//!
//! ```no_run
//! # use bearer_relay::{ApiClient, ApiRequest};
//! # async fn example(client: ApiClient) -> bearer_relay::Result<()> {
//! let response = client
//!     .send(ApiRequest::get("/ticket-service/boards").query("limit", "20"))
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```
//!
//! ### 2. Many callers, one refresh
//!
//! ```no_run
//! # use bearer_relay::{ApiClient, ApiRequest};
//! # async fn example(client: ApiClient) {
//! let results = client
//!     .send_all(vec![
//!         ApiRequest::get("/ticket-service/boards"),
//!         ApiRequest::get("/ticket-service/statuses"),
//!         ApiRequest::get("/authen-service/users/me"),
//!     ])
//!     .await;
//! # }
//! ```
//!
//! ### 3. Custom components
//!
//! The credential store, HTTP transport and refresh client are traits, so each
//! can be replaced through [`ApiClient::builder`]:
//!
//! ```no_run
//! # use bearer_relay::{ApiClient, ClientConfig};
//! # use bearer_relay::auth::MemoryCredentialStore;
//! # fn example() -> bearer_relay::Result<()> {
//! let client = ApiClient::builder()
//!     .config(ClientConfig::builder().base_url("http://localhost:8080").build())
//!     .store(MemoryCredentialStore::new())
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`auth`]: token pair, credential stores, refresh client, sign-in helpers
//! - [`request`]: re-issuable request descriptors and responses
//! - [`transport`]: raw HTTP exchange (`reqwest` in production)
//! - [`dispatcher`]: bearer attachment and response classification
//! - [`coordinator`]: single-flight refresh state machine
//! - [`client`]: the façade tying it all together
//! - [`config`]: client configuration
//! - [`error`]: error types and handling
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tracing events are always emitted but are zero-cost when no subscriber is attached.
//! Tokens are never logged.
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, PipelineError>`](Result):
//!
//! ```no_run
//! # use bearer_relay::{ApiClient, PipelineError};
//! # async fn example(client: ApiClient) {
//! match client.get_json::<serde_json::Value>("/ticket-service/boards").await {
//!     Ok(boards) => println!("{boards}"),
//!     Err(e) if e.is_terminal_auth() => {
//!         // Session cannot be renewed: clear credentials, go to login
//!         let _ = client.auth().sign_out();
//!     }
//!     Err(PipelineError::RequestError { status, message, .. }) => {
//!         eprintln!("API error {status}: {message}");
//!     }
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod request;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use auth::{
    AuthService, CredentialStore, FileCredentialStore, HttpTokenRefresher, MemoryCredentialStore,
    TokenPair, TokenRefresher,
};
pub use client::{ApiClient, ApiClientBuilder};
pub use config::ClientConfig;
pub use coordinator::{AuthEvent, RefreshCoordinator};
pub use dispatcher::RequestDispatcher;
pub use error::{PipelineError, Result};
pub use request::{ApiRequest, ApiResponse, PendingRequest, PreparedRequest};
pub use transport::{HttpTransport, ReqwestTransport};
pub use tokio_util::sync::CancellationToken;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
