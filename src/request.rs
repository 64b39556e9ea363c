//! Request descriptors and responses
//!
//! [`ApiRequest`] is a re-issuable description of one call: the dispatcher only
//! ever borrows it, so a request that hit a 401 can be replayed byte for byte.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Re-issuable description of an outbound request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    target: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl ApiRequest {
    /// Create a request for a path relative to the base URL, or an absolute URL
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// `GET` request
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    /// `POST` request
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    /// `PUT` request
    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    /// `PATCH` request
    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    /// `DELETE` request
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a raw body
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidRequest` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| PipelineError::invalid_request(format!("JSON body: {e}")))?;
        self.body = Some(body);
        Ok(self)
    }

    /// HTTP method
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path or absolute URL as given
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Request-specific headers
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Body bytes, if any
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Build the wire-level request for `url`
    ///
    /// `default_headers` are applied first, then request headers, then the
    /// bearer credential (which always wins).
    pub(crate) fn prepare(
        &self,
        url: &str,
        default_headers: &[(String, String)],
        authorization: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<PreparedRequest> {
        let mut url = Url::parse(url)
            .map_err(|e| PipelineError::invalid_request(format!("{url}: {e}")))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in default_headers.iter().chain(self.headers.iter()) {
            headers.insert(parse_name(name)?, parse_value(name, value)?);
        }
        if let Some(authorization) = authorization {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                parse_value("authorization", &authorization)?,
            );
        }

        Ok(PreparedRequest {
            method: self.method.clone(),
            url,
            headers,
            body: self.body.clone(),
            timeout,
        })
    }
}

fn parse_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| PipelineError::invalid_request(format!("header name {name:?}: {e}")))
}

fn parse_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| PipelineError::invalid_request(format!("header {name:?}: {e}")))
}

/// A request paired with its replay bookkeeping
///
/// `already_retried` is set once, when the request is replayed after a
/// refresh, and never cleared.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request: ApiRequest,
    already_retried: bool,
}

impl PendingRequest {
    /// Wrap a request that has not been replayed yet
    #[must_use]
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            already_retried: false,
        }
    }

    /// The underlying request
    #[must_use]
    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// Whether the request has already been replayed once
    #[must_use]
    pub fn already_retried(&self) -> bool {
        self.already_retried
    }

    /// Mark the request as replayed
    #[must_use]
    pub fn into_retried(mut self) -> Self {
        self.already_retried = true;
        self
    }
}

impl From<ApiRequest> for PendingRequest {
    fn from(request: ApiRequest) -> Self {
        Self::new(request)
    }
}

/// Wire-level request handed to an [`HttpTransport`](crate::transport::HttpTransport)
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method
    pub method: Method,
    /// Fully resolved URL
    pub url: Url,
    /// Final header set, including `Authorization` when a token exists
    pub headers: HeaderMap,
    /// Body bytes
    pub body: Option<Vec<u8>>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    /// Value of the `Authorization` header, if set
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

/// Response returned to callers
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    /// Create a response
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// HTTP status
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8 (lossy)
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Decode` if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            PipelineError::decode(format!(
                "{e} - Response: {}",
                crate::utils::body_preview(&self.body, 256)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_applies_headers_in_order() {
        let request = ApiRequest::get("/boards")
            .header("x-trace", "abc")
            .header("content-type", "text/plain");
        let defaults = vec![("content-type".to_string(), "application/json".to_string())];

        let prepared = request
            .prepare("http://api.local/boards", &defaults, None, None)
            .unwrap();

        assert_eq!(prepared.headers["content-type"], "text/plain");
        assert_eq!(prepared.headers["x-trace"], "abc");
        assert!(prepared.authorization().is_none());
    }

    #[test]
    fn test_prepare_bearer_overrides_caller_header() {
        let request = ApiRequest::get("/me").header("Authorization", "Bearer stale");
        let prepared = request
            .prepare("http://api.local/me", &[], Some("Bearer fresh".to_string()), None)
            .unwrap();

        assert_eq!(prepared.authorization(), Some("Bearer fresh"));
    }

    #[test]
    fn test_prepare_encodes_query() {
        let request = ApiRequest::get("/tickets").query("q", "a b&c");
        let prepared = request
            .prepare("http://api.local/tickets", &[], None, None)
            .unwrap();

        assert_eq!(prepared.url.as_str(), "http://api.local/tickets?q=a+b%26c");
    }

    #[test]
    fn test_prepare_rejects_bad_header() {
        let request = ApiRequest::get("/x").header("bad header", "v");
        let result = request.prepare("http://api.local/x", &[], None, None);
        assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
    }

    #[test]
    fn test_prepare_rejects_bad_url() {
        let request = ApiRequest::get("/x");
        let result = request.prepare("not a url", &[], None, None);
        assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
    }

    #[test]
    fn test_prepare_leaves_request_reusable() {
        let request = ApiRequest::post("/tickets")
            .json(&serde_json::json!({"title": "t"}))
            .unwrap();

        let first = request.prepare("http://api.local/tickets", &[], None, None).unwrap();
        let second = request.prepare("http://api.local/tickets", &[], None, None).unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(request.body_bytes(), first.body.as_deref());
    }

    #[test]
    fn test_pending_request_retry_flag() {
        let pending = PendingRequest::new(ApiRequest::get("/me"));
        assert!(!pending.already_retried());

        let retried = pending.into_retried();
        assert!(retried.already_retried());
        assert_eq!(retried.request().target(), "/me");
    }

    #[test]
    fn test_response_json() {
        #[derive(serde::Deserialize)]
        struct Board {
            id: u32,
        }

        let response = ApiResponse::new(StatusCode::OK, HeaderMap::new(), br#"{"id":7}"#.to_vec());
        let board: Board = response.json().unwrap();
        assert_eq!(board.id, 7);

        let bad = ApiResponse::new(StatusCode::OK, HeaderMap::new(), b"nope".to_vec());
        assert!(matches!(bad.json::<Board>(), Err(PipelineError::Decode(_))));
    }
}
