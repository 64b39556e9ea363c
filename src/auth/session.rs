//! Authentication service endpoints
//!
//! Sign-in seeds the credential store, sign-out clears it. Sign-in and sign-up
//! are public endpoints and go out without a bearer token; `me` is an ordinary
//! authenticated call and goes through the refresh pipeline.

use serde::{Deserialize, Serialize};

use super::token::TokenPair;
use crate::client::ApiClient;
use crate::error::Result;
use crate::request::ApiRequest;

/// Path prefix of the authentication service
const AUTHEN_SERVICE: &str = "/authen-service";

/// Sign-up payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    /// First name
    pub name: String,
    /// Last name
    pub lastname: String,
    /// Email address
    pub email: String,
    /// Plain-text password (sent over TLS)
    pub password: String,
}

/// Current user profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Me {
    /// User id
    pub id: u64,
    /// First name
    pub name: String,
    /// Last name
    pub lastname: String,
    /// Email address
    pub email: String,
    /// Creation timestamp as formatted by the server
    pub created_at: String,
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Authentication service bound to a client
#[derive(Debug, Clone)]
pub struct AuthService {
    client: ApiClient,
}

impl AuthService {
    /// Bind to `client`
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Sign in and store the issued token pair
    ///
    /// # Errors
    ///
    /// Returns `RequestError` for rejected credentials (e.g. 401 "invalid
    /// password", 404 "user not found"), or a storage error if the pair
    /// cannot be persisted.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<TokenPair> {
        let request = ApiRequest::post(format!("{AUTHEN_SERVICE}/sign-in"))
            .json(&SignInRequest { email, password })?;

        let tokens: TokenPair = self.client.dispatcher().dispatch_public(&request).await?.json()?;
        self.client.store().set(&tokens)?;

        tracing::info!("Signed in");
        Ok(tokens)
    }

    /// Create an account
    ///
    /// # Errors
    ///
    /// Returns `RequestError` if the server rejects the payload (e.g. 409 "user already exists").
    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<()> {
        let request = ApiRequest::post(format!("{AUTHEN_SERVICE}/sign-up")).json(request)?;
        self.client.dispatcher().dispatch_public(&request).await?;
        Ok(())
    }

    /// Fetch the signed-in user's profile
    ///
    /// # Errors
    ///
    /// Any pipeline error, including terminal auth failures.
    pub async fn me(&self) -> Result<Me> {
        self.client.get_json(&format!("{AUTHEN_SERVICE}/users/me")).await
    }

    /// Forget the stored token pair
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be cleared.
    pub fn sign_out(&self) -> Result<()> {
        self.client.store().clear()?;
        tracing::info!("Signed out");
        Ok(())
    }
}
