//! Envelope key hierarchy
//!
//! Every non-master scope owns one random key, stored only in sealed form
//! in its own `meta` bucket:
//!
//! ```text
//! Account / User      sealed_key = Seal(passphrase, key)
//! Shelf / Collection  sealed_key = Encrypt(container key, key)
//! ```
//!
//! Unlocking walks a [`ScopePath`] top-down. Each level's key opens the next
//! and is dropped (zeroized) as soon as it has done so.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quire_core::{Sealing, ScopeKey, ScopeType};
use quire_crypto::{KdfParams, SymmetricKey};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::db::{buckets, Reader};
use crate::error::{StoreError, StoreResult};
use crate::registry::{Handle, Registry};

const META_KEY: &[u8] = b"scope";

/// A scope key in its persisted, sealed form
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedKey(Vec<u8>);

impl EncryptedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptedKey({} bytes)", self.0.len())
    }
}

impl Serialize for EncryptedKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for EncryptedKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Persisted in each non-master store's `meta` bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeMeta {
    pub kind: ScopeType,
    pub container: Option<ScopeKey>,
    pub sealed_key: EncryptedKey,
}

impl ScopeMeta {
    pub(crate) fn read(reader: &impl Reader) -> StoreResult<Option<Self>> {
        match reader.get(buckets::META, META_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn encode(&self) -> StoreResult<(&'static [u8], Vec<u8>)> {
        Ok((META_KEY, serde_json::to_vec(self)?))
    }
}

/// What unlocks a scope key: the caller's passphrase or the container's key
#[derive(Clone, Copy)]
pub enum Unlock<'a> {
    Passphrase(&'a SecretString),
    ContainerKey(&'a SymmetricKey),
}

impl Unlock<'_> {
    fn sealing(&self) -> Sealing {
        match self {
            Unlock::Passphrase(_) => Sealing::Passphrase,
            Unlock::ContainerKey(_) => Sealing::ContainerKey,
        }
    }
}

/// Seal a freshly generated scope key for storage.
pub fn seal_key(
    kind: ScopeType,
    key: &SymmetricKey,
    unlock: Unlock<'_>,
    params: &KdfParams,
) -> StoreResult<EncryptedKey> {
    if kind.sealing() != unlock.sealing() {
        return Err(StoreError::Invalid(format!(
            "{kind} keys are not sealed with {:?}",
            unlock.sealing()
        )));
    }
    let sealed = match unlock {
        Unlock::Passphrase(passphrase) => quire_crypto::seal(passphrase, key.as_bytes(), params)?,
        Unlock::ContainerKey(container) => quire_crypto::encrypt(container, key.as_bytes())?,
    };
    Ok(EncryptedKey(sealed))
}

/// Recover a scope key. Every failure is [`StoreError::Unauthorized`].
pub fn unseal_key(
    kind: ScopeType,
    sealed: &EncryptedKey,
    unlock: Unlock<'_>,
    params: &KdfParams,
) -> StoreResult<SymmetricKey> {
    if kind.sealing() != unlock.sealing() {
        return Err(StoreError::Unauthorized);
    }
    let plaintext = match unlock {
        Unlock::Passphrase(passphrase) => quire_crypto::open(passphrase, sealed.as_bytes(), params),
        Unlock::ContainerKey(container) => quire_crypto::decrypt(container, sealed.as_bytes()),
    }
    .map_err(|_| StoreError::Unauthorized)?;

    SymmetricKey::from_plaintext(plaintext).ok_or(StoreError::Unauthorized)
}

/// A chain of scopes to unlock, head first
///
/// Valid when the head is passphrase-sealed and each next element may live
/// inside the previous one, e.g. `[User u, Shelf s, Collection c]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePath(Vec<ScopeKey>);

impl ScopePath {
    pub fn new(keys: Vec<ScopeKey>) -> StoreResult<Self> {
        let Some(head) = keys.first() else {
            return Err(StoreError::Invalid("empty scope path".into()));
        };
        if head.kind.sealing() != Sealing::Passphrase {
            return Err(StoreError::Invalid(format!(
                "scope path must start at a passphrase scope, not {}",
                head.kind
            )));
        }
        for pair in keys.windows(2) {
            if !pair[1].kind.is_contained_in(pair[0].kind) {
                return Err(StoreError::Invalid(format!(
                    "{} cannot live inside {}",
                    pair[1].kind, pair[0].kind
                )));
            }
        }
        Ok(Self(keys))
    }

    pub fn tail(&self) -> ScopeKey {
        self.0[self.0.len() - 1]
    }

    pub fn keys(&self) -> &[ScopeKey] {
        &self.0
    }
}

/// Bucket in a container store that lists its child scopes of `kind`
pub(crate) fn child_bucket(kind: ScopeType) -> Option<&'static str> {
    match kind {
        ScopeType::Shelf => Some(buckets::SHELVES),
        ScopeType::Collection => Some(buckets::COLLECTIONS),
        ScopeType::Master | ScopeType::Account | ScopeType::User => None,
    }
}

/// Walk `path` with `passphrase`, returning the tail's handle and key.
///
/// A missing store, missing container entry, container mismatch or failed
/// unseal all come back as [`StoreError::Unauthorized`].
pub fn unlock_path(
    registry: &Registry,
    path: &ScopePath,
    passphrase: &SecretString,
) -> StoreResult<(Arc<Handle>, SymmetricKey)> {
    let params = registry.kdf_params();
    let mut current: Option<(Arc<Handle>, SymmetricKey)> = None;

    for &key in path.keys() {
        let handle = registry.get_existing(key).map_err(hide_absence)?;
        let meta = handle.meta().map_err(hide_absence)?;
        if meta.kind != key.kind {
            return Err(StoreError::Unauthorized);
        }

        let scope_key = match &current {
            None => unseal_key(key.kind, &meta.sealed_key, Unlock::Passphrase(passphrase), &params)?,
            Some((parent, parent_key)) => {
                if meta.container != Some(parent.key()) {
                    return Err(StoreError::Unauthorized);
                }
                let listed = match child_bucket(key.kind) {
                    Some(bucket) => parent
                        .store()
                        .view(|tx| tx.get(bucket, key.id.as_bytes()))?
                        .is_some(),
                    None => false,
                };
                if !listed {
                    return Err(StoreError::Unauthorized);
                }
                unseal_key(key.kind, &meta.sealed_key, Unlock::ContainerKey(parent_key), &params)?
            }
        };

        // Replacing `current` drops the parent key.
        current = Some((handle, scope_key));
    }

    current.ok_or(StoreError::Unauthorized)
}

/// Report a missing scope the same way as a failed unlock.
pub(crate) fn hide_absence(err: StoreError) -> StoreError {
    match err {
        StoreError::NotFound => StoreError::Unauthorized,
        other => other,
    }
}
