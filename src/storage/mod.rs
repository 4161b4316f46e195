pub use token_store_factory::{create_storage, DynStorage, ObservedStorage, Storage};

/// Module path for the SQLx adapter.
pub use token_store_factory::sqlx;

/// Module path for the Mongo adapter.
#[cfg(feature = "mongo")]
pub use token_store_factory::mongo;
