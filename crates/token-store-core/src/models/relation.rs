use serde::{Deserialize, Serialize};
use std::fmt;

/// The vocabulary of the relation index.
///
/// Grants are flow names ("authorization_code", "client_credentials", ...),
/// not stored rows; the other kinds refer to entities by their external
/// identifier (client_id, scope name, session id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Client,
    Grant,
    Scope,
    Session,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Grant => "grant",
            Self::Scope => "scope",
            Self::Session => "session",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "client" => Some(Self::Client),
            "grant" => Some(Self::Grant),
            "scope" => Some(Self::Scope),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One undirected association row, e.g. "client c1 may request scope read".
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub a_kind: String,
    pub a_id: String,
    pub b_kind: String,
    pub b_id: String,
}

impl Relation {
    pub fn new(a_kind: EntityKind, a_id: &str, b_kind: EntityKind, b_id: &str) -> Self {
        Self {
            a_kind: a_kind.as_str().to_string(),
            a_id: a_id.to_string(),
            b_kind: b_kind.as_str().to_string(),
            b_id: b_id.to_string(),
        }
    }

    /// The opposite endpoint of this row, given one endpoint.
    ///
    /// Returns `None` when the given endpoint is on neither side or a stored
    /// kind no longer parses.
    pub fn other(&self, kind: EntityKind, id: &str) -> Option<(EntityKind, String)> {
        if self.a_kind == kind.as_str() && self.a_id == id {
            return EntityKind::parse(&self.b_kind).map(|k| (k, self.b_id.clone()));
        }
        if self.b_kind == kind.as_str() && self.b_id == id {
            return EntityKind::parse(&self.a_kind).map(|k| (k, self.a_id.clone()));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_strings() {
        for kind in [
            EntityKind::Client,
            EntityKind::Grant,
            EntityKind::Scope,
            EntityKind::Session,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("user"), None);
    }

    #[test]
    fn other_returns_the_opposite_endpoint() {
        let rel = Relation::new(EntityKind::Client, "c1", EntityKind::Scope, "read");

        assert_eq!(
            rel.other(EntityKind::Client, "c1"),
            Some((EntityKind::Scope, "read".to_string()))
        );
        assert_eq!(
            rel.other(EntityKind::Scope, "read"),
            Some((EntityKind::Client, "c1".to_string()))
        );
        assert_eq!(rel.other(EntityKind::Client, "c2"), None);
    }
}
