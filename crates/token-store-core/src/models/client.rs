use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// A registered OAuth2 client.
///
/// Secrets are stored as SHA-256 hex digests; the plaintext never touches the
/// store or the logs. Allowed grants and scopes live in the relation index,
/// not on the row.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub client_id: String,
    pub client_secret_hash: String,
    pub redirect_uri: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn new(client_id: String, client_secret: &str, redirect_uri: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_id,
            client_secret_hash: hash_secret(client_secret),
            redirect_uri,
            name,
            created_at: now,
            updated_at: now,
        }
    }

    /// Constant-time comparison of a candidate secret against the stored digest.
    pub fn verify_secret(&self, candidate: &str) -> bool {
        let candidate_hash = hash_secret(candidate);
        bool::from(
            candidate_hash
                .as_bytes()
                .ct_eq(self.client_secret_hash.as_bytes()),
        )
    }
}

/// SHA-256 hex digest of a client secret.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_stored_as_digest() {
        let client = Client::new(
            "client_1".to_string(),
            "s3cret",
            "http://localhost/cb".to_string(),
            "test client".to_string(),
        );

        assert_ne!(client.client_secret_hash, "s3cret");
        assert_eq!(client.client_secret_hash.len(), 64);
    }

    #[test]
    fn verify_secret_accepts_match_and_rejects_mismatch() {
        let client = Client::new(
            "client_1".to_string(),
            "s3cret",
            "http://localhost/cb".to_string(),
            "test client".to_string(),
        );

        assert!(client.verify_secret("s3cret"));
        assert!(!client.verify_secret("wrong"));
        assert!(!client.verify_secret(""));
    }
}
