//! Request dispatcher: attach the current bearer token, send, classify
//!
//! The dispatcher reads the access token from the credential store right
//! before every send, so a replay after a refresh always carries whatever
//! token is current at that moment. It never writes shared state.

use std::sync::Arc;

use crate::auth::{CredentialStore, bearer};
use crate::config::ClientConfig;
use crate::error::{PipelineError, Result};
use crate::request::{ApiRequest, ApiResponse};
use crate::transport::HttpTransport;
use crate::utils;

/// Maximum body bytes included in failure logs
const LOG_BODY_PREVIEW: usize = 200;

/// Sends single requests and classifies their outcome
pub struct RequestDispatcher {
    base_url: String,
    default_headers: Vec<(String, String)>,
    request_timeout: Option<std::time::Duration>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl RequestDispatcher {
    /// Create a dispatcher for `config`
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            base_url: config.base_url.clone(),
            default_headers: config.request_headers(),
            request_timeout: config.request_timeout,
            store,
            transport,
        }
    }

    /// Send `request` once with the current access token
    ///
    /// # Errors
    ///
    /// - `Network` when no response was received
    /// - `AuthExpired` on 401
    /// - `RequestError` on any other non-2xx status
    /// - `Storage` / `InvalidRequest` if the request could not be prepared
    pub async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let access_token = self.store.access_token()?;
        self.send(request, access_token.as_deref(), true).await
    }

    /// Send `request` to a public endpoint (sign-in, sign-up) without credentials
    ///
    /// A 401 here is an ordinary rejection (e.g. wrong password), so it is
    /// reported as `RequestError` and never starts a refresh.
    ///
    /// # Errors
    ///
    /// Same as [`RequestDispatcher::dispatch`], except 401 maps to `RequestError`.
    pub async fn dispatch_public(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.send(request, None, false).await
    }

    async fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
        refreshable: bool,
    ) -> Result<ApiResponse> {
        let url = utils::resolve_url(&self.base_url, request.target());
        let prepared = request.prepare(
            &url,
            &self.default_headers,
            access_token.map(bearer),
            self.request_timeout,
        )?;

        tracing::debug!(
            method = %request.method(),
            url = %url,
            authenticated = access_token.is_some(),
            "Dispatching request"
        );

        let response = self.transport.execute(prepared).await.inspect_err(|e| {
            tracing::debug!(method = %request.method(), url = %url, error = %e, "Request got no response");
        })?;

        classify(response, refreshable).inspect_err(|e| {
            tracing::debug!(method = %request.method(), url = %url, error = %e, "Request failed");
        })
    }
}

/// Map a raw response onto the pipeline's error taxonomy
fn classify(response: ApiResponse, refreshable: bool) -> Result<ApiResponse> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if refreshable && status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(PipelineError::AuthExpired);
    }

    let message = utils::error_message(status, response.bytes());
    tracing::trace!(
        status = status.as_u16(),
        body = %utils::body_preview(response.bytes(), LOG_BODY_PREVIEW),
        "Error response body"
    );
    Err(PipelineError::request(
        status.as_u16(),
        message,
        response.text(),
    ))
}
