// Caller identity for WebSocket connections

use async_trait::async_trait;
use thiserror::Error;

// Public API
pub use token::JwtIdentityVerifier;
pub use types::{Identity, IdentityClaims, UserType};

// Internal modules
mod token;
mod types;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid authorization format (expected Bearer token)")]
    InvalidScheme,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Resolves a bearer token to the identity it was issued for
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Extract the token from an `Authorization` value of the form `Bearer <token>`
pub fn bearer_token(authorization: &str) -> Result<&str, AuthError> {
    let token = authorization
        .trim_start()
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidScheme)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}
