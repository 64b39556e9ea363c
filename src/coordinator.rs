//! Single-flight refresh coordinator
//!
//! When a request comes back 401, the coordinator makes sure exactly one
//! refresh call is in flight and every caller that hit the same failure waits
//! for that call and is replayed once.
//!
//! # Cycle lifecycle
//!
//! ```text
//!            first 401                      refresh ok / failed / timeout
//!   Idle ───────────────▶ Refreshing(id, rx) ─────────────────────────────▶ Idle
//!    │                        ▲     │
//!    │ no refresh token       │     └─ publish outcome on the cycle's watch channel
//!    ▼                        │        (under the same lock that clears the slot)
//!  RefreshUnavailable     later 401s clone `rx` and wait
//! ```
//!
//! Each cycle gets its own `watch` channel, so a waiter can only ever see the
//! outcome of the cycle it joined. The refresh runs on a detached task: a
//! caller that is dropped mid-wait (including the one that started the cycle)
//! never cancels the refresh for the others.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::auth::{CredentialStore, TokenPair, TokenRefresher};
use crate::dispatcher::RequestDispatcher;
use crate::error::{PipelineError, Result};
use crate::request::{ApiResponse, PendingRequest};

/// Capacity of the auth event channel
const EVENT_CAPACITY: usize = 16;

const ABORTED: &str = "refresh task aborted";

/// Result of one refresh cycle, shared by all of its waiters
#[derive(Debug, Clone)]
pub(crate) enum RefreshOutcome {
    /// The store now holds this pair
    Success(TokenPair),
    /// The refresh failed; the store was left untouched
    Failure(String),
}

/// Session-level notifications for upstream code (e.g. to force a logout)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A refresh cycle stored a new token pair
    Refreshed {
        /// Cycle number
        cycle: u64,
    },
    /// Credentials can no longer be renewed; the user must sign in again
    SessionExpired {
        /// Human-readable cause
        reason: String,
    },
}

type OutcomeRx = watch::Receiver<Option<RefreshOutcome>>;

struct RefreshCycle {
    id: u64,
    outcome: OutcomeRx,
}

#[derive(Default)]
struct RefreshState {
    // `Some` while a refresh is in progress
    current: Option<RefreshCycle>,
    next_id: u64,
    completed: u64,
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn current_cycle(state: &RefreshState) -> Option<(u64, OutcomeRx)> {
    state.current.as_ref().map(|cycle| {
        tracing::debug!(cycle = cycle.id, "Joining refresh in progress");
        (cycle.id, cycle.outcome.clone())
    })
}

/// Coordinates token refreshes for one client
pub struct RefreshCoordinator {
    dispatcher: Arc<RequestDispatcher>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_timeout: Duration,
    state: Arc<Mutex<RefreshState>>,
    events: broadcast::Sender<AuthEvent>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refreshing", &self.is_refreshing())
            .field("completed_cycles", &self.completed_cycles())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Create a coordinator with its own, idle refresh state
    pub fn new(
        dispatcher: Arc<RequestDispatcher>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        refresh_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            dispatcher,
            store,
            refresher,
            refresh_timeout,
            state: Arc::new(Mutex::new(RefreshState::default())),
            events,
        }
    }

    /// Recover from a 401 on `pending`: refresh (or join a running refresh) and replay once
    ///
    /// # Errors
    ///
    /// - `RetryExhausted` if `pending` was already replayed, or its replay is rejected with 401
    /// - `RefreshUnavailable` if no refresh token is stored
    /// - `RefreshFailed` if the cycle this call joined failed or timed out
    /// - any dispatch error from the replay
    pub async fn handle_auth_failure(&self, pending: PendingRequest) -> Result<ApiResponse> {
        if pending.already_retried() {
            return Err(self.retry_exhausted(&pending));
        }

        self.refresh().await?;

        let pending = pending.into_retried();
        match self.dispatcher.dispatch(pending.request()).await {
            Err(PipelineError::AuthExpired) => Err(self.retry_exhausted(&pending)),
            other => other,
        }
    }

    /// Wait for a fresh token pair, starting a refresh cycle if none is running
    ///
    /// # Errors
    ///
    /// Returns `RefreshUnavailable` if no refresh token is stored, or
    /// `RefreshFailed` if the joined cycle failed.
    pub async fn refresh(&self) -> Result<TokenPair> {
        let (cycle, mut outcome) = self.join_or_start()?;

        match wait_for_outcome(&mut outcome).await {
            RefreshOutcome::Success(tokens) => {
                tracing::debug!(cycle, "Refresh cycle succeeded");
                Ok(tokens)
            }
            RefreshOutcome::Failure(reason) => {
                tracing::debug!(cycle, %reason, "Refresh cycle failed");
                Err(PipelineError::RefreshFailed(reason))
            }
        }
    }

    /// Whether a refresh cycle is in progress
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        lock(&self.state).current.is_some()
    }

    /// Number of refresh cycles that have finished (successfully or not)
    #[must_use]
    pub fn completed_cycles(&self) -> u64 {
        lock(&self.state).completed
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn join_or_start(&self) -> Result<(u64, OutcomeRx)> {
        let mut seen_completed = {
            let state = lock(&self.state);
            if let Some(cycle) = current_cycle(&state) {
                return Ok(cycle);
            }
            state.completed
        };

        // Store I/O happens outside the lock. If a cycle finished meanwhile,
        // the token just read may already be rotated, so read it again.
        let (mut state, refresh_token) = loop {
            let refresh_token = self.store.refresh_token()?;
            let state = lock(&self.state);
            if let Some(cycle) = current_cycle(&state) {
                return Ok(cycle);
            }
            if state.completed == seen_completed {
                break (state, refresh_token);
            }
            seen_completed = state.completed;
        };

        let Some(refresh_token) = refresh_token else {
            drop(state);
            tracing::warn!("Access token rejected and no refresh token stored");
            publish(
                &self.events,
                AuthEvent::SessionExpired {
                    reason: "no refresh token".to_string(),
                },
            );
            return Err(PipelineError::RefreshUnavailable);
        };

        state.next_id += 1;
        let id = state.next_id;
        let (tx, rx) = watch::channel(None);
        state.current = Some(RefreshCycle {
            id,
            outcome: rx.clone(),
        });
        drop(state);

        tracing::info!(cycle = id, "Starting token refresh");
        self.spawn_cycle(id, refresh_token, tx);
        Ok((id, rx))
    }

    fn spawn_cycle(&self, id: u64, refresh_token: String, tx: watch::Sender<Option<RefreshOutcome>>) {
        let store = Arc::clone(&self.store);
        let refresher = Arc::clone(&self.refresher);
        let timeout = self.refresh_timeout;
        let mut guard = CycleGuard {
            id,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            tx: Some(tx),
        };

        tokio::spawn(async move {
            let outcome = run_refresh(store.as_ref(), refresher.as_ref(), timeout, &refresh_token).await;
            guard.finish(outcome);
        });
    }

    fn retry_exhausted(&self, pending: &PendingRequest) -> PipelineError {
        tracing::warn!(
            method = %pending.request().method(),
            target = pending.request().target(),
            "Request rejected again after token refresh"
        );
        publish(
            &self.events,
            AuthEvent::SessionExpired {
                reason: "token rejected after refresh".to_string(),
            },
        );
        PipelineError::RetryExhausted
    }
}

async fn run_refresh(
    store: &dyn CredentialStore,
    refresher: &dyn TokenRefresher,
    timeout: Duration,
    refresh_token: &str,
) -> RefreshOutcome {
    match tokio::time::timeout(timeout, refresher.refresh(refresh_token)).await {
        Err(_) => RefreshOutcome::Failure(format!(
            "refresh timed out after {}ms",
            timeout.as_millis()
        )),
        Ok(Err(e)) => RefreshOutcome::Failure(e.to_string()),
        Ok(Ok(tokens)) => match store.set(&tokens) {
            Ok(()) => RefreshOutcome::Success(tokens),
            Err(e) => RefreshOutcome::Failure(format!("could not store refreshed tokens: {e}")),
        },
    }
}

async fn wait_for_outcome(rx: &mut OutcomeRx) -> RefreshOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => {
            let outcome: Option<RefreshOutcome> = (*value).clone();
            outcome.unwrap_or_else(|| RefreshOutcome::Failure(ABORTED.to_string()))
        }
        // Sender dropped without publishing
        Err(_) => RefreshOutcome::Failure(ABORTED.to_string()),
    }
}

fn publish(events: &broadcast::Sender<AuthEvent>, event: AuthEvent) {
    // No subscribers is fine
    let _ = events.send(event);
}

/// Ends a cycle exactly once, even if the refresh task panics
struct CycleGuard {
    id: u64,
    state: Arc<Mutex<RefreshState>>,
    events: broadcast::Sender<AuthEvent>,
    tx: Option<watch::Sender<Option<RefreshOutcome>>>,
}

impl CycleGuard {
    fn finish(&mut self, outcome: RefreshOutcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };

        match &outcome {
            RefreshOutcome::Success(_) => {
                tracing::info!(cycle = self.id, "Token refresh succeeded");
            }
            RefreshOutcome::Failure(reason) => {
                tracing::warn!(cycle = self.id, %reason, "Token refresh failed");
            }
        }
        let event = match &outcome {
            RefreshOutcome::Success(_) => AuthEvent::Refreshed { cycle: self.id },
            RefreshOutcome::Failure(reason) => AuthEvent::SessionExpired {
                reason: reason.clone(),
            },
        };

        {
            let mut state = lock(&self.state);
            if state.current.as_ref().is_some_and(|c| c.id == self.id) {
                state.current = None;
            }
            state.completed += 1;
            tx.send_replace(Some(outcome));
        }

        publish(&self.events, event);
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.finish(RefreshOutcome::Failure(ABORTED.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::config::ClientConfig;
    use crate::request::{ApiRequest, PreparedRequest};
    use crate::transport::HttpTransport;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts only `Bearer good`
    struct Gatekeeper;

    #[async_trait]
    impl HttpTransport for Gatekeeper {
        async fn execute(&self, request: PreparedRequest) -> Result<ApiResponse> {
            let status = if request.authorization() == Some("Bearer good") {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };
            Ok(ApiResponse::new(status, HeaderMap::new(), b"{}".to_vec()))
        }
    }

    struct FixedRefresher {
        calls: AtomicUsize,
        result: std::result::Result<TokenPair, &'static str>,
    }

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(PipelineError::refresh_failed)
        }
    }

    struct PanickingRefresher;

    #[async_trait]
    impl TokenRefresher for PanickingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair> {
            panic!("refresher blew up");
        }
    }

    fn coordinator(
        store: Arc<MemoryCredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> RefreshCoordinator {
        let config = ClientConfig::builder().base_url("http://api.local").build();
        let dispatcher = Arc::new(RequestDispatcher::new(
            &config,
            store.clone(),
            Arc::new(Gatekeeper),
        ));
        RefreshCoordinator::new(dispatcher, store, refresher, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_refresh_then_replay() {
        let store = Arc::new(MemoryCredentialStore::with_tokens(TokenPair::new("stale", "r1")));
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicUsize::new(0),
            result: Ok(TokenPair::new("good", "r2")),
        });
        let coordinator = coordinator(store.clone(), refresher.clone());

        let response = coordinator
            .handle_auth_failure(ApiRequest::get("/me").into())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get().unwrap(), Some(TokenPair::new("good", "r2")));
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.completed_cycles(), 1);
    }

    #[tokio::test]
    async fn test_already_retried_is_rejected_without_refresh() {
        let store = Arc::new(MemoryCredentialStore::with_tokens(TokenPair::new("stale", "r1")));
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicUsize::new(0),
            result: Ok(TokenPair::new("good", "r2")),
        });
        let coordinator = coordinator(store, refresher.clone());

        let pending = PendingRequest::new(ApiRequest::get("/me")).into_retried();
        let err = coordinator.handle_auth_failure(pending).await.unwrap_err();

        assert!(matches!(err, PipelineError::RetryExhausted));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_publishes_session_expired() {
        let store = Arc::new(MemoryCredentialStore::new());
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicUsize::new(0),
            result: Ok(TokenPair::new("good", "r2")),
        });
        let coordinator = coordinator(store, refresher.clone());
        let mut events = coordinator.subscribe();

        let err = coordinator
            .handle_auth_failure(ApiRequest::get("/me").into())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::RefreshUnavailable));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(!coordinator.is_refreshing());
        assert!(matches!(
            events.try_recv(),
            Ok(AuthEvent::SessionExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_store_untouched() {
        let store = Arc::new(MemoryCredentialStore::with_tokens(TokenPair::new("stale", "r1")));
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicUsize::new(0),
            result: Err("invalid token"),
        });
        let coordinator = coordinator(store.clone(), refresher);

        let err = coordinator
            .handle_auth_failure(ApiRequest::get("/me").into())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::RefreshFailed(ref m) if m.contains("invalid token")));
        assert_eq!(store.get().unwrap(), Some(TokenPair::new("stale", "r1")));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_panicking_refresher_releases_waiters() {
        let store = Arc::new(MemoryCredentialStore::with_tokens(TokenPair::new("stale", "r1")));
        let coordinator = coordinator(store, Arc::new(PanickingRefresher));

        let err = coordinator.refresh().await.unwrap_err();

        assert!(matches!(err, PipelineError::RefreshFailed(ref m) if m == ABORTED));
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.completed_cycles(), 1);
    }

    /// Hands out a pair but cannot persist a new one
    struct ReadOnlyStore(TokenPair);

    impl CredentialStore for ReadOnlyStore {
        fn get(&self) -> std::result::Result<Option<TokenPair>, crate::auth::TokenError> {
            Ok(Some(self.0.clone()))
        }

        fn set(&self, _tokens: &TokenPair) -> std::result::Result<(), crate::auth::TokenError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only file system").into())
        }

        fn clear(&self) -> std::result::Result<(), crate::auth::TokenError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_write_failure_fails_every_waiter() {
        let store: Arc<dyn CredentialStore> =
            Arc::new(ReadOnlyStore(TokenPair::new("stale", "r1")));
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicUsize::new(0),
            result: Ok(TokenPair::new("good", "r2")),
        });
        let config = ClientConfig::builder().base_url("http://api.local").build();
        let dispatcher = Arc::new(RequestDispatcher::new(
            &config,
            Arc::clone(&store),
            Arc::new(Gatekeeper),
        ));
        let coordinator =
            RefreshCoordinator::new(dispatcher, store, refresher.clone(), Duration::from_secs(1));
        let mut events = coordinator.subscribe();

        let (a, b, c) = tokio::join!(
            coordinator.handle_auth_failure(PendingRequest::new(ApiRequest::get("/a"))),
            coordinator.handle_auth_failure(PendingRequest::new(ApiRequest::get("/b"))),
            coordinator.handle_auth_failure(PendingRequest::new(ApiRequest::get("/c"))),
        );

        for result in [a, b, c] {
            let err = result.unwrap_err();
            assert!(
                matches!(err, PipelineError::RefreshFailed(ref m)
                    if m.starts_with("could not store refreshed tokens:") && m.contains("read-only")),
                "unexpected error: {err:?}"
            );
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.completed_cycles(), 1);

        assert!(matches!(
            events.try_recv(),
            Ok(AuthEvent::SessionExpired { ref reason }) if reason.starts_with("could not store")
        ));
        assert!(events.try_recv().is_err(), "exactly one event per cycle");
    }

    /// Records whether the coordinator lock was free on every read
    struct LockCheckingStore {
        inner: MemoryCredentialStore,
        state: std::sync::OnceLock<Arc<Mutex<RefreshState>>>,
        reads_under_lock: AtomicUsize,
    }

    impl CredentialStore for LockCheckingStore {
        fn get(&self) -> std::result::Result<Option<TokenPair>, crate::auth::TokenError> {
            if let Some(state) = self.state.get() {
                if state.try_lock().is_err() {
                    self.reads_under_lock.fetch_add(1, Ordering::SeqCst);
                }
            }
            self.inner.get()
        }

        fn set(&self, tokens: &TokenPair) -> std::result::Result<(), crate::auth::TokenError> {
            self.inner.set(tokens)
        }

        fn clear(&self) -> std::result::Result<(), crate::auth::TokenError> {
            self.inner.clear()
        }
    }

    #[tokio::test]
    async fn test_store_is_read_outside_coordination_lock() {
        let store = Arc::new(LockCheckingStore {
            inner: MemoryCredentialStore::with_tokens(TokenPair::new("stale", "r1")),
            state: std::sync::OnceLock::new(),
            reads_under_lock: AtomicUsize::new(0),
        });
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicUsize::new(0),
            result: Ok(TokenPair::new("good", "r2")),
        });
        let config = ClientConfig::builder().base_url("http://api.local").build();
        let dispatcher = Arc::new(RequestDispatcher::new(
            &config,
            store.clone(),
            Arc::new(Gatekeeper),
        ));
        let coordinator =
            RefreshCoordinator::new(dispatcher, store.clone(), refresher, Duration::from_secs(1));
        let _ = store.state.set(Arc::clone(&coordinator.state));

        let response = coordinator
            .handle_auth_failure(PendingRequest::new(ApiRequest::get("/me")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.reads_under_lock.load(Ordering::SeqCst), 0);
    }
}
