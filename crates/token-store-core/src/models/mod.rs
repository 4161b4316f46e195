pub mod authorization;
pub mod client;
pub mod error;
pub mod relation;
pub mod scope;
pub mod session;
pub mod token;

pub use authorization::*;
pub use client::*;
pub use error::*;
pub use relation::*;
pub use scope::*;
pub use session::*;
pub use token::*;
