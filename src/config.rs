//! Client configuration

use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::error::{PipelineError, Result};

/// Environment variable holding the API base URL
pub const ENV_API_URL: &str = "BEARER_RELAY_API_URL";
/// Environment variable holding the refresh timeout in milliseconds
pub const ENV_REFRESH_TIMEOUT_MS: &str = "BEARER_RELAY_REFRESH_TIMEOUT_MS";
/// Environment variable holding the per-request timeout in milliseconds
pub const ENV_REQUEST_TIMEOUT_MS: &str = "BEARER_RELAY_REQUEST_TIMEOUT_MS";

/// Configuration shared by the dispatcher, the refresh client and the session helpers
#[derive(Debug, Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for ClientConfig"),
    builder_type(doc = "Builder for ClientConfig", vis = "pub")
)]
pub struct ClientConfig {
    /// Base URL of the API; relative request paths are joined onto it
    #[builder(setter(into))]
    pub base_url: String,

    /// Path of the refresh endpoint, relative to `base_url`
    #[builder(default = ClientConfig::DEFAULT_REFRESH_PATH.to_string(), setter(into))]
    pub refresh_path: String,

    /// JSON field carrying the refresh token in the refresh request body
    #[builder(default = ClientConfig::DEFAULT_REFRESH_FIELD.to_string(), setter(into))]
    pub refresh_field: String,

    /// Upper bound for one refresh call; expiry counts as a refresh failure
    #[builder(default = ClientConfig::DEFAULT_REFRESH_TIMEOUT)]
    pub refresh_timeout: Duration,

    /// Optional timeout applied to every dispatched request
    #[builder(default, setter(strip_option))]
    pub request_timeout: Option<Duration>,

    /// Extra headers sent with every request (after `Content-Type: application/json`)
    #[builder(default)]
    pub default_headers: Vec<(String, String)>,
}

impl ClientConfig {
    /// Default refresh endpoint path
    pub const DEFAULT_REFRESH_PATH: &'static str = "/authen-service/refresh-token";
    /// Default refresh request field
    pub const DEFAULT_REFRESH_FIELD: &'static str = "refresh_token";
    /// Default refresh timeout (10 seconds)
    pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a configuration from `BEARER_RELAY_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` if the base URL is missing, a
    /// timeout is not a number, or the result fails [`ClientConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup(ENV_API_URL)
            .ok_or_else(|| PipelineError::invalid_config(format!("{ENV_API_URL} is not set")))?;

        let mut config = Self::builder().base_url(base_url).build();

        if let Some(ms) = parse_millis(&lookup, ENV_REFRESH_TIMEOUT_MS)? {
            config.refresh_timeout = ms;
        }
        config.request_timeout = parse_millis(&lookup, ENV_REQUEST_TIMEOUT_MS)?;

        config.validate()?;
        Ok(config)
    }

    /// Headers sent with every outbound call, the refresh call included
    ///
    /// `Content-Type: application/json` comes first so `default_headers` can override it.
    #[must_use]
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        headers.extend(self.default_headers.iter().cloned());
        headers
    }

    /// Check the configuration for obvious mistakes
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(PipelineError::invalid_config("base_url is empty"));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(PipelineError::invalid_config(format!(
                "base_url must be an http(s) URL, got {base:?}"
            )));
        }
        if self.refresh_field.is_empty() {
            return Err(PipelineError::invalid_config("refresh_field is empty"));
        }
        if self.refresh_timeout.is_zero() {
            return Err(PipelineError::invalid_config("refresh_timeout must be non-zero"));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PipelineError::invalid_config("request_timeout must be non-zero"));
        }
        Ok(())
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| PipelineError::invalid_config(format!("{key}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .base_url("https://api.example.com")
            .build();

        assert_eq!(config.refresh_path, "/authen-service/refresh-token");
        assert_eq!(config.refresh_field, "refresh_token");
        assert_eq!(config.refresh_timeout, Duration::from_secs(10));
        assert!(config.request_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_request_headers_include_defaults() {
        let config = ClientConfig::builder()
            .base_url("https://api.example.com")
            .default_headers(vec![("x-api-key".to_string(), "k1".to_string())])
            .build();

        assert_eq!(
            config.request_headers(),
            vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("x-api-key".to_string(), "k1".to_string()),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let config = ClientConfig::builder().base_url("").build();
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let config = ClientConfig::builder().base_url("ftp://example.com").build();
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = ClientConfig::builder()
            .base_url("http://localhost")
            .refresh_timeout(Duration::ZERO)
            .build();
        assert!(config.validate().is_err());

        let config = ClientConfig::builder()
            .base_url("http://localhost")
            .request_timeout(Duration::ZERO)
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_API_URL, "http://localhost:8080"),
            (ENV_REFRESH_TIMEOUT_MS, "250"),
            (ENV_REQUEST_TIMEOUT_MS, "1000"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.refresh_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_from_lookup_missing_url() {
        let result = ClientConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_lookup_bad_timeout() {
        let result = ClientConfig::from_lookup(lookup(&[
            (ENV_API_URL, "http://localhost:8080"),
            (ENV_REFRESH_TIMEOUT_MS, "soon"),
        ]));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}
