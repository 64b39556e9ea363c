//! URL and response-body helpers shared by the dispatcher and refresh client

/// Whether a request target bypasses the configured base URL
///
/// Any target starting with `http` is treated as absolute, which covers both
/// `http://` and `https://` destinations on third-party hosts.
#[inline]
#[must_use]
pub fn is_absolute_url(target: &str) -> bool {
    target.starts_with("http")
}

/// Join a relative path onto a base URL with exactly one `/` between them
///
/// # Example
/// ```
/// use bearer_relay::utils::join_url;
///
/// assert_eq!(join_url("http://api.local/", "/boards"), "http://api.local/boards");
/// assert_eq!(join_url("http://api.local", "boards"), "http://api.local/boards");
/// ```
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{base}/{path}")
}

/// Resolve a request target against the base URL
#[must_use]
pub fn resolve_url(base: &str, target: &str) -> String {
    if is_absolute_url(target) {
        target.to_string()
    } else {
        join_url(base, target)
    }
}

/// Extract the `message` field from a JSON error body
///
/// Returns `None` for non-JSON bodies or when `message` is missing, empty or not a string.
#[must_use]
pub fn body_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("message")
        .and_then(serde_json::Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Error text for a failed response: body `message`, else the status reason phrase
#[must_use]
pub fn error_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    body_message(body).unwrap_or_else(|| match status.canonical_reason() {
        Some(reason) => reason.to_string(),
        None => format!("request failed with status {}", status.as_u16()),
    })
}

/// Lossy, length-capped rendering of a body for logs
///
/// Cuts at a UTF-8 character boundary and appends "..." when truncated.
#[must_use]
pub fn body_preview(body: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= max_bytes {
        return text.into_owned();
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}...", &text[..boundary])
}
