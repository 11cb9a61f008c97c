//! Client tokens: per-client keys, counters and session state
//!
//! A token is created by `KeyExchange` and lives in memory only. Each one
//! carries a fresh server signing key, the client's verifying key, the two
//! sequence counters and the client's [`Session`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::{Mutex, RwLock};
use quire_core::ScopeId;
use rand::rngs::OsRng;

use crate::error::Rejection;

const TOKEN_BYTES: usize = 32;

/// Scopes the client has signed in to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub account: Option<ScopeId>,
    pub user: Option<ScopeId>,
}

impl Session {
    pub fn clear(&mut self) {
        *self = Session::default();
    }
}

pub struct ClientToken {
    id: String,
    signing_key: SigningKey,
    client_key: VerifyingKey,
    /// Last sequence accepted from the client
    recv: AtomicU64,
    /// Last sequence sent to the client
    send: AtomicU64,
    session: Mutex<Session>,
}

impl ClientToken {
    pub fn new(client_key: VerifyingKey) -> Self {
        Self {
            id: URL_SAFE_NO_PAD.encode(quire_crypto::random_bytes(TOKEN_BYTES)),
            signing_key: SigningKey::generate(&mut OsRng),
            client_key,
            recv: AtomicU64::new(0),
            send: AtomicU64::new(0),
            session: Mutex::new(Session::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key the client verifies replies with
    pub fn server_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Accept `seq` only if it is exactly one past the last accepted sequence.
    ///
    /// Compare-and-advance is one atomic step: of two concurrent requests with
    /// the same sequence, exactly one passes. A rejected sequence leaves the
    /// counter untouched.
    pub fn check_sequence(&self, seq: u64) -> Result<(), Rejection> {
        let previous = seq.checked_sub(1).ok_or(Rejection::Sequence)?;
        self.recv
            .compare_exchange(previous, seq, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Rejection::Sequence)
    }

    pub fn recv_sequence(&self) -> u64 {
        self.recv.load(Ordering::Acquire)
    }

    pub fn verify(&self, body: &[u8], signature: &Signature) -> Result<(), Rejection> {
        self.client_key
            .verify(body, signature)
            .map_err(|_| Rejection::Signature)
    }

    /// Sign a reply body and allocate its sequence number.
    pub fn sign_reply(&self, body: &[u8]) -> (Signature, u64) {
        let seq = self.send.fetch_add(1, Ordering::AcqRel) + 1;
        (self.signing_key.sign(body), seq)
    }

    pub fn session(&self) -> &Mutex<Session> {
        &self.session
    }
}

impl std::fmt::Debug for ClientToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientToken")
            .field("recv", &self.recv)
            .field("send", &self.send)
            .finish_non_exhaustive()
    }
}

/// Tokens kept when no limit is configured
pub const DEFAULT_TOKEN_LIMIT: usize = 4096;

/// All live tokens, keyed by token string.
///
/// Tokens live until the process exits; once `limit` are held, new
/// handshakes are refused with [`Rejection::TokenLimit`].
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, Arc<ClientToken>>>,
    limit: usize,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::with_limit(DEFAULT_TOKEN_LIMIT)
    }
}

impl TokenRegistry {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            limit,
        }
    }

    pub fn register(&self, client_key: VerifyingKey) -> Result<Arc<ClientToken>, Rejection> {
        let mut tokens = self.tokens.write();
        if tokens.len() >= self.limit {
            return Err(Rejection::TokenLimit);
        }
        let token = Arc::new(ClientToken::new(client_key));
        tokens.insert(token.id().to_string(), Arc::clone(&token));
        Ok(token)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ClientToken>> {
        self.tokens.read().get(id).cloned()
    }

    pub fn unregister(&self, id: &str) {
        self.tokens.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}
