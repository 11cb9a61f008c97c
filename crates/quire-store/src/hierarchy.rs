//! Scope lifecycle: accounts, users, shelves and collections
//!
//! There is no cross-store transaction. Creating a child writes the child
//! store (with its sealed key) first and the container's entry second; a
//! crash in between leaves an unreferenced child store. Retrying with the
//! same id reuses that store as long as its key unseals the same way.

use std::sync::Arc;

use quire_core::{ScopeId, ScopeKey, ScopeType};
use quire_crypto::SymmetricKey;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::blind;
use crate::db::{buckets, Reader};
use crate::envelope::{hide_absence, seal_key, unlock_path, unseal_key, ScopeMeta, ScopePath, Unlock};
use crate::error::{StoreError, StoreResult};
use crate::registry::{Handle, Registry};

/// A child scope as listed by its container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub id: ScopeId,
    pub name: String,
}

#[derive(Serialize, Deserialize)]
struct EntryBody {
    name: String,
}

/// Where a record lives: an owner scope, optionally narrowed to a shelf and collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub owner: ScopeKey,
    pub shelf: Option<ScopeId>,
    pub collection: Option<ScopeId>,
}

impl Target {
    pub fn path(&self) -> StoreResult<ScopePath> {
        let mut keys = vec![self.owner];
        match (self.shelf, self.collection) {
            (None, None) => {}
            (Some(shelf), None) => keys.push(ScopeKey::shelf(shelf)),
            (Some(shelf), Some(collection)) => {
                keys.push(ScopeKey::shelf(shelf));
                keys.push(ScopeKey::collection(collection));
            }
            (None, Some(_)) => {
                return Err(StoreError::Invalid("a collection target needs its shelf".into()))
            }
        }
        ScopePath::new(keys)
    }
}

fn require_name(what: &str, name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::Invalid(format!("{what} must not be empty")));
    }
    Ok(())
}

/// Open `key`'s store and make sure it holds a sealed key under `container`.
///
/// A store that already carries meta for the same container is reused when
/// `unlock` opens its key. An id held by another kind or another container
/// reads as [`StoreError::Unauthorized`], the same as a scope the caller
/// cannot open.
fn ensure_scope(
    registry: &Registry,
    key: ScopeKey,
    container: ScopeKey,
    unlock: Unlock<'_>,
) -> StoreResult<(Arc<Handle>, SymmetricKey)> {
    let params = registry.kdf_params();
    let handle = registry.get_handle(key)?;

    let scope_key = handle.store().update(|tx| {
        if let Some(existing) = ScopeMeta::read(&*tx)? {
            if existing.kind != key.kind || existing.container != Some(container) {
                return Err(StoreError::Unauthorized);
            }
            tracing::debug!(scope = %key, "reusing existing scope store");
            return unseal_key(key.kind, &existing.sealed_key, unlock, &params)
                .map_err(|_| StoreError::Unauthorized);
        }

        let scope_key = SymmetricKey::generate();
        let meta = ScopeMeta {
            kind: key.kind,
            container: Some(container),
            sealed_key: seal_key(key.kind, &scope_key, unlock, &params)?,
        };
        let (meta_key, bytes) = meta.encode()?;
        tx.put(buckets::META, meta_key, bytes);
        Ok(scope_key)
    })?;

    Ok((handle, scope_key))
}

fn unlock_single(registry: &Registry, key: ScopeKey, passphrase: &SecretString) -> StoreResult<(Arc<Handle>, SymmetricKey)> {
    unlock_path(registry, &ScopePath::new(vec![key])?, passphrase)
}

fn put_entry(
    container: &Handle,
    container_key: &SymmetricKey,
    bucket: &str,
    id: ScopeId,
    name: &str,
) -> StoreResult<()> {
    let body = serde_json::to_vec(&EntryBody {
        name: name.to_string(),
    })?;
    let encrypted = quire_crypto::encrypt(container_key, &body)?;
    container.store().update(|tx| {
        tx.put(bucket, id.as_bytes(), encrypted);
        Ok(())
    })
}

fn list_entries(container: &Handle, container_key: &SymmetricKey, bucket: &str) -> StoreResult<Vec<ScopeEntry>> {
    let entries = container.store().view(|tx| tx.scan(bucket))?;
    entries
        .into_iter()
        .map(|(id, value)| {
            let id = ScopeId::from_slice(&id).ok_or_else(|| StoreError::corrupt(bucket, "entry id is not a UUID"))?;
            let body: EntryBody = serde_json::from_slice(&quire_crypto::decrypt(container_key, &value)?)?;
            Ok(ScopeEntry { id, name: body.name })
        })
        .collect()
}

fn child_ids(container: &Handle, bucket: &str) -> StoreResult<Vec<ScopeId>> {
    let entries = container.store().view(|tx| tx.scan(bucket))?;
    entries
        .into_iter()
        .map(|(id, _)| ScopeId::from_slice(&id).ok_or_else(|| StoreError::corrupt(bucket, "entry id is not a UUID")))
        .collect()
}

fn destroy_quietly(registry: &Registry, key: ScopeKey) {
    if let Err(e) = registry.destroy(&key) {
        tracing::warn!(scope = %key, "failed to remove store: {e}");
    }
}

/// Ensure no other id already holds `name` in `bucket`.
fn check_name_free(container: &Handle, bucket: &str, name: &str, id: ScopeId, registry: &Registry) -> StoreResult<()> {
    let params = registry.kdf_params();
    match container.store().view(|tx| blind::lookup(tx, bucket, name, &params)) {
        Ok(existing) if existing != id => Err(StoreError::AlreadyExists),
        Ok(_) | Err(StoreError::NotFound) => Ok(()),
        Err(e) => Err(e),
    }
}

// ── Accounts ────────────────────────────────────────────────────────────────

/// Create an account named `name`, sealed under `passphrase`.
pub fn create_account(
    registry: &Registry,
    id: Option<ScopeId>,
    name: &str,
    passphrase: &SecretString,
) -> StoreResult<ScopeId> {
    require_name("account name", name)?;
    let params = registry.kdf_params();
    let master = registry.master()?;
    let id = id.unwrap_or_else(ScopeId::generate);

    check_name_free(&master, buckets::ACCOUNT_INDEX, name, id, registry)?;

    let key = ScopeKey::account(id);
    ensure_scope(registry, key, ScopeKey::MASTER, Unlock::Passphrase(passphrase))?;
    master
        .store()
        .update(|tx| blind::save_unique(tx, buckets::ACCOUNT_INDEX, name, id, &params))?;

    tracing::info!(scope = %key, "created account");
    Ok(id)
}

/// Resolve `name` and prove `passphrase` opens the account key.
pub fn sign_in_account(registry: &Registry, name: &str, passphrase: &SecretString) -> StoreResult<ScopeId> {
    let params = registry.kdf_params();
    let master = registry.master()?;
    let id = master
        .store()
        .view(|tx| blind::lookup(tx, buckets::ACCOUNT_INDEX, name, &params))
        .map_err(hide_absence)?;

    let (handle, _key) = unlock_single(registry, ScopeKey::account(id), passphrase)?;
    if handle.meta()?.container != Some(ScopeKey::MASTER) {
        return Err(StoreError::Unauthorized);
    }
    Ok(id)
}

// ── Users ───────────────────────────────────────────────────────────────────

/// Create a user under `account`. The account passphrase authorizes the change.
pub fn create_user(
    registry: &Registry,
    account: ScopeId,
    account_passphrase: &SecretString,
    id: Option<ScopeId>,
    email: &str,
    passphrase: &SecretString,
) -> StoreResult<ScopeId> {
    require_name("user email", email)?;
    let params = registry.kdf_params();
    let account_key = ScopeKey::account(account);
    let (account_handle, _) = unlock_single(registry, account_key, account_passphrase)?;
    let id = id.unwrap_or_else(ScopeId::generate);

    check_name_free(&account_handle, buckets::USER_INDEX, email, id, registry)?;

    let key = ScopeKey::user(id);
    ensure_scope(registry, key, account_key, Unlock::Passphrase(passphrase))?;
    account_handle
        .store()
        .update(|tx| blind::save_unique(tx, buckets::USER_INDEX, email, id, &params))?;

    tracing::info!(scope = %key, account = %account, "created user");
    Ok(id)
}

/// Resolve `email` inside `account` and prove `passphrase` opens the user key.
pub fn sign_in_user(
    registry: &Registry,
    account: ScopeId,
    email: &str,
    passphrase: &SecretString,
) -> StoreResult<ScopeId> {
    let params = registry.kdf_params();
    let account_key = ScopeKey::account(account);
    let account_handle = registry.get_existing(account_key).map_err(hide_absence)?;
    let id = account_handle
        .store()
        .view(|tx| blind::lookup(tx, buckets::USER_INDEX, email, &params))
        .map_err(hide_absence)?;

    let (handle, _key) = unlock_single(registry, ScopeKey::user(id), passphrase)?;
    if handle.meta()?.container != Some(account_key) {
        return Err(StoreError::Unauthorized);
    }
    Ok(id)
}

// ── Shelves ─────────────────────────────────────────────────────────────────

fn check_owner(owner: ScopeKey) -> StoreResult<()> {
    if ScopeType::Shelf.is_contained_in(owner.kind) {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!("a {} cannot own shelves", owner.kind)))
    }
}

/// Create a shelf named `name` under an account or user.
pub fn create_shelf(
    registry: &Registry,
    owner: ScopeKey,
    passphrase: &SecretString,
    id: Option<ScopeId>,
    name: &str,
) -> StoreResult<ScopeId> {
    check_owner(owner)?;
    require_name("shelf name", name)?;
    let (owner_handle, owner_secret) = unlock_single(registry, owner, passphrase)?;
    let id = id.unwrap_or_else(ScopeId::generate);
    let key = ScopeKey::shelf(id);

    ensure_scope(registry, key, owner, Unlock::ContainerKey(&owner_secret))?;
    put_entry(&owner_handle, &owner_secret, buckets::SHELVES, id, name)?;

    tracing::info!(scope = %key, owner = %owner, "created shelf");
    Ok(id)
}

pub fn list_shelves(registry: &Registry, owner: ScopeKey, passphrase: &SecretString) -> StoreResult<Vec<ScopeEntry>> {
    check_owner(owner)?;
    let (owner_handle, owner_secret) = unlock_single(registry, owner, passphrase)?;
    list_entries(&owner_handle, &owner_secret, buckets::SHELVES)
}

/// Remove a shelf entry, then destroy the shelf store and its collections' stores.
pub fn delete_shelf(registry: &Registry, owner: ScopeKey, passphrase: &SecretString, shelf: ScopeId) -> StoreResult<()> {
    check_owner(owner)?;
    let shelf_key = ScopeKey::shelf(shelf);
    let path = ScopePath::new(vec![owner, shelf_key])?;

    let collections = {
        let (shelf_handle, _shelf_secret) = unlock_path(registry, &path, passphrase)?;
        child_ids(&shelf_handle, buckets::COLLECTIONS)?
    };

    let owner_handle = registry.get_existing(owner).map_err(hide_absence)?;
    owner_handle.store().update(|tx| {
        tx.delete(buckets::SHELVES, shelf.as_bytes());
        Ok(())
    })?;

    for collection in collections {
        destroy_quietly(registry, ScopeKey::collection(collection));
    }
    destroy_quietly(registry, shelf_key);

    tracing::info!(scope = %shelf_key, owner = %owner, "deleted shelf");
    Ok(())
}

// ── Collections ─────────────────────────────────────────────────────────────

pub fn create_collection(
    registry: &Registry,
    owner: ScopeKey,
    passphrase: &SecretString,
    shelf: ScopeId,
    id: Option<ScopeId>,
    name: &str,
) -> StoreResult<ScopeId> {
    check_owner(owner)?;
    require_name("collection name", name)?;
    let path = ScopePath::new(vec![owner, ScopeKey::shelf(shelf)])?;
    let (shelf_handle, shelf_secret) = unlock_path(registry, &path, passphrase)?;
    let id = id.unwrap_or_else(ScopeId::generate);
    let key = ScopeKey::collection(id);

    ensure_scope(registry, key, ScopeKey::shelf(shelf), Unlock::ContainerKey(&shelf_secret))?;
    put_entry(&shelf_handle, &shelf_secret, buckets::COLLECTIONS, id, name)?;

    tracing::info!(scope = %key, shelf = %shelf, "created collection");
    Ok(id)
}

pub fn list_collections(
    registry: &Registry,
    owner: ScopeKey,
    passphrase: &SecretString,
    shelf: ScopeId,
) -> StoreResult<Vec<ScopeEntry>> {
    check_owner(owner)?;
    let path = ScopePath::new(vec![owner, ScopeKey::shelf(shelf)])?;
    let (shelf_handle, shelf_secret) = unlock_path(registry, &path, passphrase)?;
    list_entries(&shelf_handle, &shelf_secret, buckets::COLLECTIONS)
}

pub fn delete_collection(
    registry: &Registry,
    owner: ScopeKey,
    passphrase: &SecretString,
    shelf: ScopeId,
    collection: ScopeId,
) -> StoreResult<()> {
    check_owner(owner)?;
    let collection_key = ScopeKey::collection(collection);
    let path = ScopePath::new(vec![owner, ScopeKey::shelf(shelf), collection_key])?;
    drop(unlock_path(registry, &path, passphrase)?);

    let shelf_handle = registry.get_existing(ScopeKey::shelf(shelf)).map_err(hide_absence)?;
    shelf_handle.store().update(|tx| {
        tx.delete(buckets::COLLECTIONS, collection.as_bytes());
        Ok(())
    })?;
    drop(shelf_handle);

    destroy_quietly(registry, collection_key);
    tracing::info!(scope = %collection_key, shelf = %shelf, "deleted collection");
    Ok(())
}

// ── Records ─────────────────────────────────────────────────────────────────

/// Unlock the store a record operation addresses.
pub fn unlock_target(
    registry: &Registry,
    target: &Target,
    passphrase: &SecretString,
) -> StoreResult<(Arc<Handle>, SymmetricKey)> {
    check_owner(target.owner)?;
    unlock_path(registry, &target.path()?, passphrase)
}
