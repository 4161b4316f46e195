//! Framework-agnostic domain types for the OAuth2 token store.
//!
//! This crate is intended to be reused by other applications without needing to
//! fork the storage backends.

pub mod clock;
pub mod models;

pub use clock::{Clock, SystemClock};
pub use models::*;
