use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named permission unit clients and sessions may request.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scope {
    pub fn new(name: String, description: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Whether every requested scope is present in the available set.
///
/// Scope sets are space-delimited strings, the OAuth2 wire form.
pub fn validate_scopes(requested: &str, available: &str) -> bool {
    let requested_scopes: Vec<&str> = requested.split_whitespace().collect();
    let available_scopes: Vec<&str> = available.split_whitespace().collect();

    requested_scopes
        .iter()
        .all(|s| available_scopes.contains(s))
}

pub fn intersect_scopes(requested: &str, available: &str) -> String {
    let requested_scopes: Vec<&str> = requested.split_whitespace().collect();
    let available_scopes: Vec<&str> = available.split_whitespace().collect();

    requested_scopes
        .iter()
        .filter(|s| available_scopes.contains(s))
        .map(|s| s.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_scopes_requires_subset() {
        assert!(validate_scopes("read", "read write"));
        assert!(validate_scopes("read write", "read write"));
        assert!(validate_scopes("", "read"));
        assert!(!validate_scopes("read write", "read"));
        assert!(!validate_scopes("admin", "read write"));
    }

    #[test]
    fn intersect_scopes_keeps_request_order() {
        assert_eq!(intersect_scopes("write read", "read write"), "write read");
        assert_eq!(intersect_scopes("admin read", "read write"), "read");
        assert_eq!(intersect_scopes("admin", "read write"), "");
    }
}
