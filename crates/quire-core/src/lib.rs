pub mod config;
pub mod error;
pub mod types;

pub use error::{QuireError, QuireResult};
pub use types::{Sealing, ScopeId, ScopeKey, ScopeType};
