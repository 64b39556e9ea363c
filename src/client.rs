//! `ApiClient`: the authenticated request pipeline
//!
//! This module provides the façade most callers use. It wires together:
//! - the credential store (where tokens live)
//! - the request dispatcher (attach bearer token, send, classify)
//! - the refresh coordinator (single-flight refresh and one replay on 401)
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          ApiClient                            │
//! │                                                               │
//! │   send(req) ──▶ RequestDispatcher ──▶ HttpTransport ──▶ API   │
//! │                     │   ▲                                     │
//! │        401 AuthExpired  │ replay (once)                       │
//! │                     ▼   │                                     │
//! │               RefreshCoordinator ──▶ TokenRefresher           │
//! │                     │      (one call per cycle, on its own    │
//! │                     │       task, bounded by refresh_timeout) │
//! │                     ▼                                         │
//! │               CredentialStore (written once per success)      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example: Basic Usage
//!
//! ```no_run
//! use bearer_relay::{ApiClient, ClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .base_url("https://api.example.com")
//!     .build();
//! let client = ApiClient::new(config)?;
//!
//! let boards: serde_json::Value = client.get_json("/ticket-service/boards").await?;
//! println!("{boards}");
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Reacting to Expired Sessions
//!
//! ```no_run
//! use bearer_relay::{ApiClient, AuthEvent, ClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(ClientConfig::from_env()?)?;
//! let mut events = client.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let AuthEvent::SessionExpired { reason } = event {
//!             eprintln!("Session expired ({reason}), please sign in again");
//!         }
//!     }
//! });
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    AuthService, CredentialStore, FileCredentialStore, HttpTokenRefresher, TokenPair,
    TokenRefresher,
};
use crate::config::ClientConfig;
use crate::coordinator::{AuthEvent, RefreshCoordinator};
use crate::dispatcher::RequestDispatcher;
use crate::error::{PipelineError, Result};
use crate::request::{ApiRequest, ApiResponse, PendingRequest};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Builder for [`ApiClient`]
#[derive(Default)]
pub struct ApiClientBuilder {
    config: Option<ClientConfig>,
    store: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl ApiClientBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration (required)
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the credential store (default: [`FileCredentialStore`] at the default path)
    #[must_use]
    pub fn store(mut self, store: impl CredentialStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Share an existing credential store
    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the HTTP transport (default: [`ReqwestTransport`])
    #[must_use]
    pub fn transport(mut self, transport: impl HttpTransport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set the refresh client (default: [`HttpTokenRefresher`] over the same transport)
    #[must_use]
    pub fn refresher(mut self, refresher: impl TokenRefresher + 'static) -> Self {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` if no configuration was given or it fails validation.
    pub fn build(self) -> Result<ApiClient> {
        let config = self
            .config
            .ok_or_else(|| PipelineError::invalid_config("ApiClient requires a ClientConfig"))?;
        config.validate()?;

        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileCredentialStore::new()),
        };
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()),
        };
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpTokenRefresher::new(&config, Arc::clone(&transport))),
        };

        let dispatcher = Arc::new(RequestDispatcher::new(
            &config,
            Arc::clone(&store),
            transport,
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&dispatcher),
            Arc::clone(&store),
            refresher,
            config.refresh_timeout,
        ));

        tracing::debug!(base_url = %config.base_url, "Built API client");

        Ok(ApiClient {
            config: Arc::new(config),
            store,
            dispatcher,
            coordinator,
        })
    }
}

/// Client that authenticates every request and recovers from expired access tokens
///
/// Cloning is cheap and clones share the same store and refresh state, so a
/// single refresh serves every clone.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    store: Arc<dyn CredentialStore>,
    dispatcher: Arc<RequestDispatcher>,
    coordinator: Arc<RefreshCoordinator>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client with the default store, transport and refresher
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` if `config` fails validation.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Create a builder for custom components
    #[must_use]
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// Send a request, refreshing credentials and replaying once on 401
    ///
    /// # Errors
    ///
    /// - `Network` / `RequestError` passed through from the dispatcher
    /// - `RefreshUnavailable`, `RefreshFailed`, `RetryExhausted` on terminal auth failure
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        match self.dispatcher.dispatch(&request).await {
            Err(PipelineError::AuthExpired) => {
                tracing::debug!(
                    method = %request.method(),
                    target = request.target(),
                    "Access token rejected, entering refresh"
                );
                self.coordinator
                    .handle_auth_failure(PendingRequest::new(request))
                    .await
            }
            other => other,
        }
    }

    /// Like [`ApiClient::send`], but gives up with `Cancelled` when `cancel` fires
    ///
    /// Cancelling only abandons this caller; a refresh it started keeps running
    /// for everyone else waiting on it.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Cancelled` if cancelled first, otherwise as [`ApiClient::send`].
    pub async fn send_cancellable(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Request cancelled by caller");
                Err(PipelineError::Cancelled)
            }
            result = self.send(request) => result,
        }
    }

    /// Send several requests concurrently; results keep the input order
    pub async fn send_all(&self, requests: Vec<ApiRequest>) -> Vec<Result<ApiResponse>> {
        futures::future::join_all(requests.into_iter().map(|request| self.send(request))).await
    }

    /// `GET` a path and decode the JSON body
    ///
    /// # Errors
    ///
    /// Any pipeline error, or `Decode` if the body does not match `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// `POST` a JSON body and decode the JSON response
    ///
    /// # Errors
    ///
    /// Any pipeline error, or `Decode` if the body does not match `T`.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    /// `PUT` a JSON body and decode the JSON response
    ///
    /// # Errors
    ///
    /// Any pipeline error, or `Decode` if the body does not match `T`.
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await?.json()
    }

    /// `PATCH` a JSON body and decode the JSON response
    ///
    /// # Errors
    ///
    /// Any pipeline error, or `Decode` if the body does not match `T`.
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::patch(path).json(body)?).await?.json()
    }

    /// `DELETE` a path
    ///
    /// # Errors
    ///
    /// Any pipeline error.
    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Authentication service endpoints bound to this client
    #[must_use]
    pub fn auth(&self) -> AuthService {
        AuthService::new(self.clone())
    }

    /// Subscribe to session events (refreshes, expired sessions)
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.coordinator.subscribe()
    }

    /// Whether a token pair is stored
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.store.get(), Ok(Some(_)))
    }

    /// Currently stored token pair, if readable
    #[must_use]
    pub fn current_tokens(&self) -> Option<TokenPair> {
        self.store.get().ok().flatten()
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the credential store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Get the dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Get the refresh coordinator
    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }
}
