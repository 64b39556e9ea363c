//! Token pair and credential stores

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Fixed key under which the token pair is persisted
pub const AUTHORIZATION_KEY: &str = "x-authorization";

/// Errors that can occur during credential store operations
#[derive(Debug, Error)]
pub enum TokenError {
    /// I/O error during storage operations
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Lock poisoned by a panicking writer
    #[error("Credential store lock poisoned")]
    Poisoned,
}

/// Access/refresh token pair issued by the authentication service
///
/// Both tokens are opaque. Expiry is never inspected locally; it is discovered
/// when the API rejects a request with 401.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token sent as the bearer credential
    pub access_token: String,
    /// Refresh token exchanged for a new pair
    pub refresh_token: String,
}

impl TokenPair {
    /// Create a new token pair
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        bearer(&self.access_token)
    }
}

// Tokens never end up in logs through Debug.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Format a bearer credential header value
#[must_use]
pub fn bearer(access_token: &str) -> String {
    format!("Bearer {access_token}")
}

/// Holder of the current token pair
///
/// Implementations only read and write; all coordination is done by the
/// refresh coordinator. Reads may run while a write is in progress and must
/// return either the previous pair or the new one. Calls may block on I/O;
/// the coordinator never makes them while holding its own lock.
pub trait CredentialStore: Send + Sync {
    /// Current token pair, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self) -> Result<Option<TokenPair>, TokenError>;

    /// Replace the stored token pair
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, tokens: &TokenPair) -> Result<(), TokenError>;

    /// Remove any stored token pair
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be cleared.
    fn clear(&self) -> Result<(), TokenError>;

    /// Current access token, if any
    ///
    /// # Errors
    ///
    /// Propagates read errors from [`CredentialStore::get`].
    fn access_token(&self) -> Result<Option<String>, TokenError> {
        Ok(self.get()?.map(|pair| pair.access_token))
    }

    /// Current refresh token, if any
    ///
    /// # Errors
    ///
    /// Propagates read errors from [`CredentialStore::get`].
    fn refresh_token(&self) -> Result<Option<String>, TokenError> {
        Ok(self.get()?.map(|pair| pair.refresh_token))
    }
}

/// In-process credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a token pair
    #[must_use]
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<TokenPair>, TokenError> {
        let guard = self.tokens.read().map_err(|_| TokenError::Poisoned)?;
        Ok(guard.clone())
    }

    fn set(&self, tokens: &TokenPair) -> Result<(), TokenError> {
        let mut guard = self.tokens.write().map_err(|_| TokenError::Poisoned)?;
        *guard = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenError> {
        let mut guard = self.tokens.write().map_err(|_| TokenError::Poisoned)?;
        *guard = None;
        Ok(())
    }
}

/// Durable credential store backed by a JSON file
///
/// The file is named after [`AUTHORIZATION_KEY`] and lives in the platform
/// config directory unless a custom path is given.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    storage_path: PathBuf,
}

impl Default for FileCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileCredentialStore {
    /// Create a store at the default path (platform-specific config directory)
    #[must_use]
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bearer-relay");

        Self {
            storage_path: config_dir.join(format!("{AUTHORIZATION_KEY}.json")),
        }
    }

    /// Create a store at a custom path
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { storage_path: path }
    }

    /// Get the storage path
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.storage_path
    }

    // Unique per write so concurrent writers never share a staging file
    fn staging_path(&self) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let mut name = self
            .storage_path
            .file_name()
            .map(|f| f.to_os_string())
            .unwrap_or_else(|| AUTHORIZATION_KEY.into());
        name.push(format!(".{}.{n}.tmp", std::process::id()));
        self.storage_path.with_file_name(name)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<TokenPair>, TokenError> {
        let content = match std::fs::read_to_string(&self.storage_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tokens: TokenPair = serde_json::from_str(&content)?;

        Ok(Some(tokens))
    }

    fn set(&self, tokens: &TokenPair) -> Result<(), TokenError> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(tokens)?;

        // Readers see either the old file or the new one, never a partial write
        let staging = self.staging_path();
        if let Err(e) = write_private(&staging, content.as_bytes())
            .and_then(|()| std::fs::rename(&staging, &self.storage_path))
        {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }

        tracing::debug!(path = %self.storage_path.display(), "Stored token pair");
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenError> {
        match std::fs::remove_file(&self.storage_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Create `path` with user-only permissions and write `bytes` to it
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
