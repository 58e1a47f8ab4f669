use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, instrument};

use super::types::{Identity, IdentityClaims, UserType};
use super::{AuthError, IdentityVerifier};

/// Verifies HS256 tokens signed with a shared secret
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    secret: String,
}

impl JwtIdentityVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Creates a token for `user_id` valid for `ttl`. Used by tooling and tests;
    /// production tokens come from the identity service.
    #[instrument(skip(self))]
    pub fn issue(
        &self,
        user_id: &str,
        user_type: Option<UserType>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = IdentityClaims {
            sub: user_id.to_string(),
            user_type,
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .map_err(|e| {
            debug!(error = %e, "Failed to encode JWT token");
            AuthError::InvalidToken(e.to_string())
        })
    }

    /// Decodes and validates a token, returning its claims
    pub fn decode_claims(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        decode::<IdentityClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!(error = %e, "Failed to decode JWT token");
            AuthError::InvalidToken(e.to_string())
        })
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    #[instrument(skip(self, token))]
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.decode_claims(token)?;
        debug!(user_id = %claims.sub, exp = claims.exp, "JWT token decoded successfully");
        Ok(Identity::from(claims))
    }
}
