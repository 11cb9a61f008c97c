//! Blind-index buckets: resolve an account name or user email to a scope id
//! without storing the identifier.
//!
//! Each entry is `salt ‖ derived key → scope id`. Lookup re-derives the
//! candidate against every stored salt; the first constant-time match wins.

use quire_core::ScopeId;
use quire_crypto::{derive_key_and_salt, BlindEntry, KdfParams};

use crate::db::{Reader, WriteTx};
use crate::error::{StoreError, StoreResult};

/// Add an entry for `name → id`.
pub fn save(tx: &mut WriteTx<'_>, bucket: &str, name: &str, id: ScopeId, params: &KdfParams) -> StoreResult<()> {
    let entry = derive_key_and_salt(name.as_bytes(), params)?;
    tx.put(bucket, &entry.to_bytes(), id.as_bytes().to_vec());
    Ok(())
}

/// Resolve `name`. [`StoreError::NotFound`] if no entry matches.
pub fn lookup(reader: &impl Reader, bucket: &str, name: &str, params: &KdfParams) -> StoreResult<ScopeId> {
    for (key, value) in reader.scan(bucket)? {
        let entry = BlindEntry::from_bytes(&key)
            .ok_or_else(|| StoreError::corrupt(bucket, "blind key has the wrong length"))?;
        if entry.matches(name.as_bytes(), params)? {
            return ScopeId::from_slice(&value)
                .ok_or_else(|| StoreError::corrupt(bucket, "scope id is not a UUID"));
        }
    }
    Err(StoreError::NotFound)
}

/// Save `name → id` unless `name` is already taken.
///
/// Re-saving the same pair is a no-op; a name bound to another id is
/// [`StoreError::AlreadyExists`].
pub fn save_unique(
    tx: &mut WriteTx<'_>,
    bucket: &str,
    name: &str,
    id: ScopeId,
    params: &KdfParams,
) -> StoreResult<()> {
    match lookup(&*tx, bucket, name, params) {
        Ok(existing) if existing == id => Ok(()),
        Ok(_) => Err(StoreError::AlreadyExists),
        Err(StoreError::NotFound) => save(tx, bucket, name, id, params),
        Err(e) => Err(e),
    }
}
