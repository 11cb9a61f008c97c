//! Process-wide registry of open scope stores
//!
//! At most one [`Handle`] exists per store file. Stores are named by
//! [`ScopeId`] alone, so the cache is keyed by id and every lookup checks the
//! requested kind against the handle's (or the on-disk meta's) kind. The
//! registry lock is held across the physical open, so concurrent first
//! requests for the same scope open it once and all receive the winner's
//! handle.
//!
//! Closing a scope only retires its handle: requests still holding the
//! `Arc` keep the store open, and a later lookup hands that same handle back
//! instead of opening the directory a second time. A retired store is reopened
//! once its last user has dropped it, and a destroyed store is removed from
//! disk at that point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use quire_core::{ScopeId, ScopeKey};
use quire_crypto::KdfParams;

use crate::db::Store;
use crate::envelope::ScopeMeta;
use crate::error::{StoreError, StoreResult};

/// An open scope store and its lazily loaded [`ScopeMeta`]
pub struct Handle {
    key: ScopeKey,
    store: Store,
    meta: OnceLock<ScopeMeta>,
    // Declared after `store` so it flips only once the database is closed
    released: Released,
}

impl Handle {
    pub fn key(&self) -> ScopeKey {
        self.key
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The scope's meta record, read from its `meta` bucket on first use.
    ///
    /// [`StoreError::NotFound`] when the store has none (always the case for Master).
    pub fn meta(&self) -> StoreResult<&ScopeMeta> {
        if let Some(meta) = self.meta.get() {
            return Ok(meta);
        }
        let meta = self
            .store
            .view(|tx| ScopeMeta::read(tx))?
            .ok_or(StoreError::NotFound)?;
        Ok(self.meta.get_or_init(|| meta))
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.key)
            .field("path", &self.store.path())
            .finish()
    }
}

/// Set when the owning [`Handle`] has finished dropping its store
#[derive(Default)]
struct Released(Arc<AtomicBool>);

impl Drop for Released {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A handle closed by the registry that may still be in use
struct Retired {
    key: ScopeKey,
    handle: Weak<Handle>,
    released: Arc<AtomicBool>,
    doomed: bool,
}

impl Retired {
    fn is_released(&self) -> bool {
        self.handle.strong_count() == 0 && self.released.load(Ordering::Acquire)
    }

    /// Block until the last user's drop has closed the database.
    fn wait_released(&self) {
        while !self.released.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
    }
}

#[derive(Default)]
struct Slots {
    open: HashMap<ScopeId, Arc<Handle>>,
    retired: HashMap<ScopeId, Retired>,
}

impl Slots {
    fn retire(&mut self, handle: Arc<Handle>, doomed: bool) {
        self.retired.insert(
            handle.key.id,
            Retired {
                key: handle.key,
                handle: Arc::downgrade(&handle),
                released: Arc::clone(&handle.released.0),
                doomed,
            },
        );
    }
}

fn check_kind(handle: &Handle, key: &ScopeKey) -> StoreResult<()> {
    if handle.key.kind != key.kind {
        tracing::debug!(scope = %key, held = %handle.key, "scope id is held by another kind");
        return Err(StoreError::Unauthorized);
    }
    Ok(())
}

pub struct Registry {
    data_dir: PathBuf,
    params: KdfParams,
    slots: Mutex<Slots>,
    opens: AtomicU64,
}

impl Registry {
    /// Create the registry over `data_dir` (created if missing). Nothing is opened yet.
    pub fn new(data_dir: &Path, params: KdfParams) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            params,
            slots: Mutex::new(Slots::default()),
            opens: AtomicU64::new(0),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.params
    }

    pub fn path_for(&self, key: &ScopeKey) -> PathBuf {
        self.data_dir.join(key.file_name())
    }

    /// The cached handle for `key`, opening (and creating) the store if needed.
    ///
    /// [`StoreError::Unauthorized`] when the id already belongs to a scope of
    /// another kind.
    pub fn get_handle(&self, key: ScopeKey) -> StoreResult<Arc<Handle>> {
        self.acquire(key, true)
    }

    /// Like [`get_handle`](Self::get_handle) but never creates a store;
    /// [`StoreError::NotFound`] if none exists on disk.
    pub fn get_existing(&self, key: ScopeKey) -> StoreResult<Arc<Handle>> {
        self.acquire(key, false)
    }

    pub fn master(&self) -> StoreResult<Arc<Handle>> {
        self.get_handle(ScopeKey::MASTER)
    }

    fn acquire(&self, key: ScopeKey, create: bool) -> StoreResult<Arc<Handle>> {
        // The nil id is Master's slot
        if key.id == ScopeId::MASTER && !key.is_master() {
            return Err(StoreError::Unauthorized);
        }

        let mut slots = self.slots.lock();
        self.reap(&mut slots);

        if let Some(handle) = slots.open.get(&key.id) {
            check_kind(handle, &key)?;
            return Ok(Arc::clone(handle));
        }

        if let Some(retired) = slots.retired.get(&key.id) {
            if let Some(handle) = retired.handle.upgrade() {
                check_kind(&handle, &key)?;
                if retired.doomed {
                    return Err(StoreError::NotFound);
                }
                slots.retired.remove(&key.id);
                slots.open.insert(key.id, Arc::clone(&handle));
                tracing::debug!(scope = %key, "revived retired handle");
                return Ok(handle);
            }
            if retired.doomed {
                return Err(StoreError::NotFound);
            }
            retired.wait_released();
            slots.retired.remove(&key.id);
        }

        let path = self.path_for(&key);
        if !create && !path.exists() {
            return Err(StoreError::NotFound);
        }

        let store = Store::open(&path).map_err(|source| {
            tracing::warn!(scope = %key, "failed to open store: {source}");
            StoreError::Unavailable { scope: key, source }
        })?;
        self.opens.fetch_add(1, Ordering::Relaxed);

        let meta = OnceLock::new();
        if !key.is_master() {
            if let Some(existing) = store.view(|tx| ScopeMeta::read(tx))? {
                if existing.kind != key.kind {
                    tracing::debug!(scope = %key, held = ?existing.kind, "scope id is held by another kind");
                    return Err(StoreError::Unauthorized);
                }
                let _ = meta.set(existing);
            }
        }

        let handle = Arc::new(Handle {
            key,
            store,
            meta,
            released: Released::default(),
        });
        slots.open.insert(key.id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop retired entries nobody holds anymore, removing doomed stores from disk.
    fn reap(&self, slots: &mut Slots) {
        slots.retired.retain(|_, retired| {
            if !retired.is_released() {
                return true;
            }
            if retired.doomed {
                if let Err(e) = self.remove_store(&retired.key) {
                    tracing::warn!(scope = %retired.key, "failed to remove store: {e}");
                }
            }
            false
        });
    }

    fn remove_store(&self, key: &ScopeKey) -> StoreResult<()> {
        let path = self.path_for(key);
        if path.exists() {
            Store::destroy(&path)?;
            tracing::info!(scope = %key, "destroyed store");
        }
        Ok(())
    }

    /// Close every handle, Master included.
    pub fn close_all(&self) {
        let mut slots = self.slots.lock();
        let open: Vec<_> = slots.open.drain().map(|(_, handle)| handle).collect();
        let closed = open.len();
        for handle in open {
            slots.retire(handle, false);
        }
        self.reap(&mut slots);
        tracing::info!(closed, in_use = slots.retired.len(), "closed all scope stores");
    }

    /// Close every handle except Master's.
    pub fn close_account_scopes(&self) {
        let mut slots = self.slots.lock();
        let ids: Vec<ScopeId> = slots
            .open
            .iter()
            .filter(|(_, handle)| !handle.key.is_master())
            .map(|(id, _)| *id)
            .collect();
        let closed = ids.len();
        for id in ids {
            if let Some(handle) = slots.open.remove(&id) {
                slots.retire(handle, false);
            }
        }
        self.reap(&mut slots);
        tracing::debug!(closed, "closed account scope stores");
    }

    /// Close `key` and delete its store from disk.
    ///
    /// If a request still holds the handle, removal happens once it is
    /// dropped; until then the scope reads as [`StoreError::NotFound`].
    pub fn destroy(&self, key: &ScopeKey) -> StoreResult<()> {
        let mut slots = self.slots.lock();
        self.reap(&mut slots);

        if let Some(handle) = slots.open.get(&key.id) {
            check_kind(handle, key)?;
        }
        if let Some(handle) = slots.open.remove(&key.id) {
            slots.retire(handle, true);
        } else if let Some(retired) = slots.retired.get_mut(&key.id) {
            if retired.key.kind != key.kind {
                return Err(StoreError::Unauthorized);
            }
            retired.doomed = true;
        } else {
            return self.remove_store(key);
        }

        self.reap(&mut slots);
        if slots.retired.contains_key(&key.id) {
            tracing::debug!(scope = %key, "store still in use, removal deferred");
        }
        Ok(())
    }

    /// Physical opens performed since creation
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Handles currently cached, Master included
    pub fn handle_count(&self) -> usize {
        self.slots.lock().open.len()
    }

    pub fn is_open(&self, key: &ScopeKey) -> bool {
        self.slots
            .lock()
            .open
            .get(&key.id)
            .is_some_and(|handle| handle.key.kind == key.kind)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("data_dir", &self.data_dir)
            .field("opens", &self.open_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{buckets, Reader};
    use std::sync::Barrier;
    use tempfile::TempDir;

    fn registry(tmp: &TempDir) -> Registry {
        Registry::new(tmp.path(), KdfParams::insecure_fast()).unwrap()
    }

    #[test]
    fn test_handle_is_cached() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let key = ScopeKey::account(ScopeId::generate());

        let a = reg.get_handle(key).unwrap();
        let b = reg.get_handle(key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.open_count(), 1);
        assert!(tmp.path().join(key.file_name()).exists());
    }

    #[test]
    fn test_concurrent_get_handle_opens_once() {
        let tmp = TempDir::new().unwrap();
        let reg = Arc::new(registry(&tmp));
        let key = ScopeKey::shelf(ScopeId::generate());
        let barrier = Arc::new(Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    reg.get_handle(key).unwrap()
                })
            })
            .collect();
        let handles: Vec<Arc<Handle>> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(reg.open_count(), 1);
        for h in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], h));
        }
    }

    #[test]
    fn test_get_existing_does_not_create() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let key = ScopeKey::user(ScopeId::generate());

        assert!(matches!(reg.get_existing(key), Err(StoreError::NotFound)));
        assert!(!tmp.path().join(key.file_name()).exists());
        assert_eq!(reg.open_count(), 0);
    }

    #[test]
    fn test_master_uses_fixed_name() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let master = reg.master().unwrap();
        assert_eq!(master.store().path(), tmp.path().join("master.db"));
        assert!(matches!(master.meta(), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_same_id_under_another_kind_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let id = ScopeId::generate();

        let account = reg.get_handle(ScopeKey::account(id)).unwrap();
        assert!(matches!(
            reg.get_handle(ScopeKey::shelf(id)),
            Err(StoreError::Unauthorized)
        ));
        assert!(matches!(
            reg.get_existing(ScopeKey::collection(id)),
            Err(StoreError::Unauthorized)
        ));
        assert!(!reg.is_open(&ScopeKey::shelf(id)));
        assert!(Arc::ptr_eq(&account, &reg.get_handle(ScopeKey::account(id)).unwrap()));
        assert_eq!(reg.open_count(), 1);
    }

    #[test]
    fn test_nil_id_is_reserved_for_master() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        assert!(matches!(
            reg.get_handle(ScopeKey::account(ScopeId::MASTER)),
            Err(StoreError::Unauthorized)
        ));
        reg.master().unwrap();
        assert_eq!(reg.open_count(), 1);
    }

    #[test]
    fn test_close_account_scopes_keeps_master() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let account = ScopeKey::account(ScopeId::generate());

        let master = reg.master().unwrap();
        reg.get_handle(account).unwrap();
        assert_eq!(reg.handle_count(), 2);

        reg.close_account_scopes();
        assert_eq!(reg.handle_count(), 1);
        assert!(Arc::ptr_eq(&master, &reg.master().unwrap()));
        assert!(!reg.is_open(&account));
    }

    #[test]
    fn test_close_all() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        reg.master().unwrap();
        reg.get_handle(ScopeKey::account(ScopeId::generate())).unwrap();

        reg.close_all();
        assert_eq!(reg.handle_count(), 0);
        assert!(!reg.is_open(&ScopeKey::MASTER));
    }

    #[test]
    fn test_closed_handle_still_in_use_is_handed_back() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let key = ScopeKey::user(ScopeId::generate());

        let in_flight = reg.get_handle(key).unwrap();
        reg.close_account_scopes();
        assert!(!reg.is_open(&key));

        let again = reg.get_handle(key).unwrap();
        assert!(Arc::ptr_eq(&in_flight, &again));
        assert_eq!(reg.open_count(), 1);
        assert!(reg.is_open(&key));
    }

    #[test]
    fn test_close_all_hands_back_master_in_use() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);

        let master = reg.master().unwrap();
        reg.close_all();
        assert!(Arc::ptr_eq(&master, &reg.master().unwrap()));
        assert_eq!(reg.open_count(), 1);
    }

    #[test]
    fn test_closed_handle_reopens_once_released() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let key = ScopeKey::user(ScopeId::generate());

        let first = reg.get_handle(key).unwrap();
        reg.close_account_scopes();
        drop(first);

        reg.get_handle(key).unwrap();
        assert_eq!(reg.open_count(), 2);
    }

    #[test]
    fn test_destroy_removes_store() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let key = ScopeKey::collection(ScopeId::generate());

        drop(reg.get_handle(key).unwrap());
        reg.destroy(&key).unwrap();
        assert!(!reg.is_open(&key));
        assert!(!tmp.path().join(key.file_name()).exists());
    }

    #[test]
    fn test_destroy_waits_for_in_flight_users() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let key = ScopeKey::collection(ScopeId::generate());
        let path = tmp.path().join(key.file_name());

        let in_flight = reg.get_handle(key).unwrap();
        reg.destroy(&key).unwrap();
        assert!(path.exists());
        assert!(!reg.is_open(&key));
        assert!(matches!(reg.get_existing(key), Err(StoreError::NotFound)));
        assert!(matches!(reg.get_handle(key), Err(StoreError::NotFound)));
        in_flight.store().view(|tx| tx.scan(buckets::META)).unwrap();

        drop(in_flight);
        assert!(matches!(reg.get_existing(key), Err(StoreError::NotFound)));
        assert!(!path.exists());
        assert_eq!(reg.open_count(), 1);
    }

    #[test]
    fn test_destroy_checks_kind() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let id = ScopeId::generate();

        let _shelf = reg.get_handle(ScopeKey::shelf(id)).unwrap();
        assert!(matches!(
            reg.destroy(&ScopeKey::account(id)),
            Err(StoreError::Unauthorized)
        ));
        assert!(reg.is_open(&ScopeKey::shelf(id)));
    }

    #[test]
    fn test_open_failure_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let key = ScopeKey::account(ScopeId::generate());
        // A plain file where the store directory should be
        std::fs::write(tmp.path().join(key.file_name()), b"not a store").unwrap();

        match reg.get_handle(key) {
            Err(StoreError::Unavailable { scope, .. }) => assert_eq!(scope, key),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
