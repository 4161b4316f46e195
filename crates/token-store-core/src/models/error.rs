use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed failure taxonomy surfaced to the external grant-flow engine.
///
/// Only [`StorageError::StoreUnavailable`] is eligible for caller-directed
/// retry; every other kind is terminal for the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum StorageError {
    NotFound(String),
    DuplicateKey(String),
    Expired(String),
    Revoked(String),
    PolicyViolation(String),
    ScopeEscalation(String),
    InvalidIdentifier(String),
    StoreUnavailable(String),
}

impl StorageError {
    pub fn not_found(detail: &str) -> Self {
        Self::NotFound(detail.to_string())
    }

    pub fn duplicate_key(detail: &str) -> Self {
        Self::DuplicateKey(detail.to_string())
    }

    pub fn expired(detail: &str) -> Self {
        Self::Expired(detail.to_string())
    }

    pub fn revoked(detail: &str) -> Self {
        Self::Revoked(detail.to_string())
    }

    pub fn policy_violation(detail: &str) -> Self {
        Self::PolicyViolation(detail.to_string())
    }

    pub fn scope_escalation(detail: &str) -> Self {
        Self::ScopeEscalation(detail.to_string())
    }

    pub fn invalid_identifier(detail: &str) -> Self {
        Self::InvalidIdentifier(detail.to_string())
    }

    pub fn store_unavailable(detail: &str) -> Self {
        Self::StoreUnavailable(detail.to_string())
    }

    /// Whether the caller may retry the failed operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotFound(d) => write!(f, "not found: {d}"),
            Self::DuplicateKey(d) => write!(f, "duplicate key: {d}"),
            Self::Expired(d) => write!(f, "expired: {d}"),
            Self::Revoked(d) => write!(f, "revoked: {d}"),
            Self::PolicyViolation(d) => write!(f, "policy violation: {d}"),
            Self::ScopeEscalation(d) => write!(f, "scope escalation: {d}"),
            Self::InvalidIdentifier(d) => write!(f, "invalid identifier: {d}"),
            Self::StoreUnavailable(d) => write!(f, "store unavailable: {d}"),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        // Provide a stable, non-leaky mapping for common constraint violations.
        if let sqlx::Error::RowNotFound = err {
            return Self::not_found("row");
        }

        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code().unwrap_or_default();
            let msg = db_err.message();

            // Postgres unique violation: 23505
            // SQLite constraint error codes vary by extended code; also match by message.
            let is_unique = code == "23505"
                || code == "2067"
                || code == "1555"
                || msg.contains("UNIQUE constraint failed")
                || msg.contains("duplicate key");

            if is_unique {
                return Self::duplicate_key(msg);
            }
        }

        Self::store_unavailable(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(StorageError::store_unavailable("connection reset").is_retryable());
        assert!(!StorageError::not_found("client").is_retryable());
        assert!(!StorageError::duplicate_key("client_id").is_retryable());
        assert!(!StorageError::expired("access token").is_retryable());
    }

    #[test]
    fn error_serializes_with_tagged_kind() {
        let err = StorageError::policy_violation("scope `write` not allowed");
        let json = serde_json::to_value(&err).expect("error should serialize");
        assert_eq!(json["error"], "policy_violation");

        let back: StorageError = serde_json::from_value(json).expect("error should deserialize");
        assert_eq!(back, err);
    }
}
