use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::token::generate_token_value;

/// A single-use authorization code tied to a session.
///
/// Exchange flips `used` exactly once; a consumed or expired code is rejected.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub id: String,
    pub code: String,
    pub session_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl AuthorizationCode {
    pub fn new(
        session_id: String,
        redirect_uri: String,
        scope: String,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            code: generate_token_value(),
            session_id,
            redirect_uri,
            scope,
            created_at: issued_at,
            expires_at: issued_at + ttl,
            used: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
