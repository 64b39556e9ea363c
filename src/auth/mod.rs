//! Credentials: token pair, credential stores, refresh client and session helpers
//!
//! # Overview
//!
//! - [`TokenPair`] is the opaque access/refresh pair issued by the
//!   authentication service.
//! - [`CredentialStore`] is the only place tokens live. The dispatcher reads it
//!   before every request and the refresh coordinator writes it once per
//!   successful refresh.
//! - [`TokenRefresher`] exchanges a refresh token for a new pair;
//!   [`HttpTokenRefresher`] is the production implementation.
//! - [`AuthService`] wraps the sign-in / sign-up / current-user endpoints.
//!
//! # Example
//!
//! ```no_run
//! use bearer_relay::auth::{CredentialStore, FileCredentialStore};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileCredentialStore::new();
//! if let Some(tokens) = store.get()? {
//!     println!("Signed in, header: {}", tokens.authorization_header());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Token Storage
//!
//! [`FileCredentialStore`] persists the pair as JSON under the fixed key
//! [`AUTHORIZATION_KEY`] in the platform-specific config directory
//! (e.g. `~/.config/bearer-relay/x-authorization.json` on Linux), with
//! user-only permissions (600) on Unix.

mod refresh;
mod session;
mod token;

pub use refresh::{HttpTokenRefresher, TokenRefresher};
pub use session::{AuthService, Me, SignUpRequest};
pub use token::{
    AUTHORIZATION_KEY, CredentialStore, FileCredentialStore, MemoryCredentialStore, TokenError,
    TokenPair, bearer,
};
