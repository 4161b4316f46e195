use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const OWNER_TYPE_USER: &str = "user";
pub const OWNER_TYPE_CLIENT: &str = "client";

/// The record linking a client (and optionally a resource owner) to a granted
/// scope set. Parent of issued codes and tokens: deleting a session cascades
/// into its children, while the client is referenced, never owned.
///
/// The granted scope set itself is kept as `session <-> scope` rows in the
/// relation index.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub client_id: String,
    pub owner_type: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(client_id: String, owner_type: String, owner_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_id,
            owner_type,
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Session on behalf of a resource owner (authorization-code style flows).
    pub fn for_user(client_id: String, user_id: String) -> Self {
        Self::new(client_id, OWNER_TYPE_USER.to_string(), user_id)
    }

    /// Session where the client acts on its own behalf (client-credentials).
    pub fn for_client(client_id: String) -> Self {
        let owner = client_id.clone();
        Self::new(client_id, OWNER_TYPE_CLIENT.to_string(), owner)
    }
}
