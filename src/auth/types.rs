use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of the authenticated user on the auction platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserType {
    #[serde(alias = "admin")]
    Admin,
    #[serde(alias = "buyer")]
    Buyer,
    #[serde(alias = "seller")]
    Seller,
}

/// JWT claims issued by the identity service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    pub exp: usize, // Expiration timestamp (standard JWT claim)
    #[serde(default)]
    pub iat: usize, // Issued at timestamp (standard JWT claim)
}

/// Verified caller of a WebSocket connection
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub user_type: Option<UserType>,
    pub expires_at: DateTime<Utc>,
}

impl From<IdentityClaims> for Identity {
    fn from(claims: IdentityClaims) -> Self {
        let expires_at = i64::try_from(claims.exp)
            .ok()
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            user_id: claims.sub,
            user_type: claims.user_type,
            expires_at,
        }
    }
}
