use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bytes of CSPRNG material per issued token value (43 chars after encoding).
const TOKEN_VALUE_BYTES: usize = 32;

/// Generate an unpredictable token/code value.
///
/// Collisions are backstopped by unique indexes in the store plus bounded
/// re-generation retries in the lifecycle layer.
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; TOKEN_VALUE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A bearer access token owned by a session.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: String,
    pub access_token: String,
    pub session_id: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl AccessToken {
    pub fn new(session_id: String, scope: String, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            access_token: generate_token_value(),
            session_id,
            scope,
            created_at: issued_at,
            expires_at: issued_at + ttl,
            revoked: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A refresh token owned by the access token it can replace.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub refresh_token: String,
    pub access_token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshToken {
    pub fn new(access_token_id: String, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            refresh_token: generate_token_value(),
            access_token_id,
            created_at: issued_at,
            expires_at: issued_at + ttl,
            revoked: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
