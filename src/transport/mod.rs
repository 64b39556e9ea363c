//! Transport layer for performing raw HTTP exchanges
//!
//! This module provides the transport abstraction used by the dispatcher and
//! the refresh client, plus the `reqwest`-backed production implementation.
//! A transport never classifies responses: every status code comes back as an
//! [`ApiResponse`]; only a missing response is an error.

pub mod http;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::{ApiResponse, PreparedRequest};

/// Transport trait for sending one prepared request
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and collect the full response
    ///
    /// # Errors
    /// Returns `PipelineError::Network` if no response was received
    async fn execute(&self, request: PreparedRequest) -> Result<ApiResponse>;
}

// Blanket implementation for shared trait objects
#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    async fn execute(&self, request: PreparedRequest) -> Result<ApiResponse> {
        (**self).execute(request).await
    }
}

pub use http::ReqwestTransport;
