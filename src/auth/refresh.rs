//! Refresh endpoint client

use async_trait::async_trait;
use std::sync::Arc;

use super::token::TokenPair;
use crate::config::ClientConfig;
use crate::error::{PipelineError, Result};
use crate::request::ApiRequest;
use crate::transport::HttpTransport;
use crate::utils;

/// Exchanges a refresh token for a new token pair
///
/// Implementations perform exactly one network call per invocation and never
/// touch the credential store; persisting the result is the coordinator's job.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a new pair
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unreachable, answers non-2xx, or
    /// returns a body that is not a token pair.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair>;
}

// Blanket implementation for shared refreshers
#[async_trait]
impl<T: TokenRefresher + ?Sized> TokenRefresher for Arc<T> {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        (**self).refresh(refresh_token).await
    }
}

/// Refresh client that POSTs to the configured refresh endpoint
///
/// Requests go straight to the transport, bypassing the dispatcher, so a 401
/// from the refresh endpoint is reported as a failure instead of starting a
/// nested refresh.
pub struct HttpTokenRefresher {
    transport: Arc<dyn HttpTransport>,
    url: String,
    field: String,
    headers: Vec<(String, String)>,
}

impl std::fmt::Debug for HttpTokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenRefresher")
            .field("url", &self.url)
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

impl HttpTokenRefresher {
    /// Create a refresher for the endpoint described by `config`
    pub fn new(config: &ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            url: utils::resolve_url(&config.base_url, &config.refresh_path),
            field: config.refresh_field.clone(),
            headers: config.request_headers(),
        }
    }

    /// Resolved refresh endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let mut payload = serde_json::Map::new();
        payload.insert(
            self.field.clone(),
            serde_json::Value::String(refresh_token.to_string()),
        );

        let request = ApiRequest::post(self.url.clone()).json(&payload)?;
        let prepared = request.prepare(&self.url, &self.headers, None, None)?;

        tracing::debug!(url = %self.url, "Calling refresh endpoint");
        let response = self.transport.execute(prepared).await?;

        let status = response.status();
        if !status.is_success() {
            let message = utils::error_message(status, response.bytes());
            return Err(PipelineError::request(
                status.as_u16(),
                message,
                response.text(),
            ));
        }

        response.json::<TokenPair>().map_err(|e| {
            PipelineError::decode(format!("Failed to parse refresh response: {e}"))
        })
    }
}
