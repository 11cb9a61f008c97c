use quire_core::ScopeKey;
use quire_crypto::CryptoError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The physical store could not be opened. Not retried.
    #[error("store {scope} unavailable: {source}")]
    Unavailable {
        scope: ScopeKey,
        #[source]
        source: rocksdb::Error,
    },

    /// Wrong passphrase, unknown scope, or a broken container chain.
    /// The three cases are indistinguishable to the caller.
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("corrupt entry in {bucket}: {reason}")]
    Corrupt { bucket: String, reason: String },

    #[error("storage backend error: {0}")]
    Backend(#[from] rocksdb::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn corrupt(bucket: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            bucket: bucket.to_string(),
            reason: reason.into(),
        }
    }
}
