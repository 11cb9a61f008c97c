//! quire-store: per-scope encrypted stores
//!
//! Layout under the data directory:
//! ```text
//! master.db            account_index
//! <account-id>.db      meta, user_index, shelves, records
//! <user-id>.db         meta, shelves, records
//! <shelf-id>.db        meta, collections, records
//! <collection-id>.db   meta, records
//! ```
//!
//! Every store is opened through the [`Registry`]; every key is reached by
//! walking a [`ScopePath`] from a passphrase.

pub mod blind;
pub mod db;
pub mod envelope;
pub mod error;
pub mod hierarchy;
pub mod records;
pub mod registry;

pub use db::{buckets, Reader, Store};
pub use envelope::{unlock_path, EncryptedKey, ScopeMeta, ScopePath, Unlock};
pub use error::{StoreError, StoreResult};
pub use hierarchy::{ScopeEntry, Target};
pub use records::{Record, RecordKind};
pub use registry::{Handle, Registry};
