use quire_store::StoreError;
use thiserror::Error;

/// Handler failure, reported to the client as a signed `{"error": code}` reply
#[derive(Debug, Error)]
pub enum RpcError {
    /// Wrong passphrase, unknown scope or no signed-in session
    #[error("unauthorized")]
    Unauthorized,

    #[error("cannot decode request: {0}")]
    Decode(String),

    #[error("conflict")]
    Conflict,

    #[error("store unavailable")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Code sent on the wire
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Unauthorized => "unauthorized",
            RpcError::Decode(_) => "decode",
            RpcError::Conflict => "conflict",
            RpcError::Unavailable => "unavailable",
            RpcError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unauthorized | StoreError::NotFound => RpcError::Unauthorized,
            StoreError::AlreadyExists => RpcError::Conflict,
            StoreError::Invalid(msg) => RpcError::Decode(msg),
            StoreError::Unavailable { scope, source } => {
                tracing::warn!(scope = %scope, "store unavailable: {source}");
                RpcError::Unavailable
            }
            other => {
                tracing::error!("store failure: {other}");
                RpcError::Internal(other.to_string())
            }
        }
    }
}

/// Why a request was dropped without a reply. Logged and counted, never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing or malformed header {0}")]
    Header(&'static str),

    #[error("unknown method")]
    UnknownMethod,

    #[error("unknown client token")]
    UnknownToken,

    #[error("sequence out of order")]
    Sequence,

    #[error("signature does not verify")]
    Signature,

    #[error("malformed handshake")]
    Handshake,

    #[error("client token limit reached")]
    TokenLimit,
}

impl Rejection {
    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Header(_) => "header",
            Rejection::UnknownMethod => "unknown_method",
            Rejection::UnknownToken => "unknown_token",
            Rejection::Sequence => "sequence",
            Rejection::Signature => "signature",
            Rejection::Handshake => "handshake",
            Rejection::TokenLimit => "token_limit",
        }
    }
}

/// Client-side failure
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid server certificate: {0}")]
    Certificate(String),

    /// The server dropped the request (empty reply)
    #[error("request rejected by server")]
    Rejected,

    #[error("reply signature does not verify")]
    BadSignature,

    #[error("reply sequence {got}, expected {expected}")]
    BadSequence { expected: u64, got: u64 },

    #[error("malformed reply: {0}")]
    Malformed(String),

    /// Signed error reply
    #[error("server returned {0}")]
    Server(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
