//! Storage backend selection for the OAuth2 token store.
//!
//! This crate centralizes URL-based backend selection (SQLx vs Mongo) and
//! wraps the chosen implementation with `ObservedStorage` for tracing.

use std::sync::Arc;

use token_store_core::StorageError;

pub use token_store_observability::ObservedStorage;
pub use token_store_ports::{DynStorage, Storage};

/// Module path for the SQLx adapter.
pub mod sqlx {
    pub use token_store_sqlx::SqlxStorage;
}

/// Module path for the Mongo adapter.
#[cfg(feature = "mongo")]
pub mod mongo {
    pub use token_store_mongo::MongoStorage;
}

/// Create a storage backend based on URL scheme.
///
/// Supported:
/// - `postgres://...` and `sqlite:...` -> SQLx backend
/// - `mongodb://...` and `mongodb+srv://...` -> Mongo backend (requires `--features mongo`)
pub async fn create_storage(database_url: &str) -> Result<DynStorage, StorageError> {
    if database_url.starts_with("mongodb://") || database_url.starts_with("mongodb+srv://") {
        #[cfg(feature = "mongo")]
        {
            let storage = mongo::MongoStorage::new(database_url).await?;
            let inner: DynStorage = Arc::new(storage);
            let observed = ObservedStorage::new(inner, "mongodb".to_string());
            return Ok(Arc::new(observed));
        }

        #[cfg(not(feature = "mongo"))]
        {
            return Err(StorageError::store_unavailable(
                "MongoDB backend requested but the binary was built without the `mongo` feature",
            ));
        }
    }

    // Default to SQLx backend for sqlite/postgres.
    let storage = token_store_sqlx::SqlxStorage::new(database_url).await?;
    let db_system =
        if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
            "postgresql"
        } else if database_url.starts_with("sqlite:") || database_url.starts_with("sqlite://") {
            "sqlite"
        } else {
            "sql"
        };

    let inner: DynStorage = Arc::new(storage);
    let observed = ObservedStorage::new(inner, db_system.to_string());
    Ok(Arc::new(observed))
}
