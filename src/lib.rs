//! Library exports.
//!
//! Most functionality lives in the workspace crates; this crate composes the
//! storage backends behind the lifecycle manager and the facade. Exporting
//! everything here gives integrators a single dependency and keeps one source
//! of truth for the types the facade exchanges with callers.

pub mod facade;
pub mod lifecycle;
pub mod storage;

pub use facade::StorageFacade;
pub use lifecycle::TokenLifecycle;

pub use token_store_config::{Config, DatabaseConfig, LifetimeConfig, PolicyConfig};
pub use token_store_core::{models, Clock, SystemClock};
pub use token_store_observability::init_tracing;
