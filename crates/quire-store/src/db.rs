//! Bucketed key/value store over a single RocksDB directory
//!
//! A bucket is a key prefix: every physical key is `bucket ‖ 0x00 ‖ key`.
//! Reads go through [`Store::view`] (a RocksDB snapshot); writes go through
//! [`Store::update`], which holds the store's writer lock and commits one
//! atomic `WriteBatch` only when the closure returns `Ok`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};

use crate::error::{StoreError, StoreResult};

/// Bucket names used across the scope stores
pub mod buckets {
    /// Master: blind account name → account id
    pub const ACCOUNT_INDEX: &str = "account_index";
    /// Account: blind user email → user id
    pub const USER_INDEX: &str = "user_index";
    /// Every non-master scope: its own [`ScopeMeta`](crate::envelope::ScopeMeta)
    pub const META: &str = "meta";
    /// Account / User: shelf id → encrypted `{name}`
    pub const SHELVES: &str = "shelves";
    /// Shelf: collection id → encrypted `{name}`
    pub const COLLECTIONS: &str = "collections";

    pub const NOTES: &str = "notes";
    pub const NOTEBOOKS: &str = "notebooks";
    pub const TAGS: &str = "tags";
    pub const TEMPLATES: &str = "templates";
}

const SEPARATOR: u8 = 0x00;

fn bucket_prefix(bucket: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(bucket.len() + 1);
    prefix.extend_from_slice(bucket.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

fn physical_key(bucket: &str, key: &[u8]) -> Vec<u8> {
    let mut full = bucket_prefix(bucket);
    full.extend_from_slice(key);
    full
}

/// Read access shared by snapshot reads and in-flight write transactions
pub trait Reader {
    fn get(&self, bucket: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// All `(key, value)` pairs in `bucket`, ordered by key.
    fn scan(&self, bucket: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// One physical scope store
pub struct Store {
    path: PathBuf,
    db: DB,
    writer: Mutex<()>,
}

impl Store {
    /// Open (or create) the store directory at `path`.
    pub fn open(path: &Path) -> Result<Self, rocksdb::Error> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path)?;
        tracing::debug!(path = %path.display(), "opened store");

        Ok(Self {
            path: path.to_path_buf(),
            db,
            writer: Mutex::new(()),
        })
    }

    /// Remove a closed store's directory.
    pub fn destroy(path: &Path) -> StoreResult<()> {
        DB::destroy(&rocksdb::Options::default(), path)?;
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against a consistent snapshot.
    pub fn view<T>(&self, f: impl FnOnce(&ReadTx<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let tx = ReadTx {
            snapshot: self.db.snapshot(),
        };
        f(&tx)
    }

    /// Run `f` as the store's only writer and commit its writes atomically.
    ///
    /// Nothing is written when `f` returns `Err`.
    pub fn update<T>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let _writer = self.writer.lock();
        let mut tx = WriteTx {
            db: &self.db,
            pending: BTreeMap::new(),
        };
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

fn scan_prefix<I>(iter: I, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut out = Vec::new();
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        out.push((key[prefix.len()..].to_vec(), value.into_vec()));
    }
    Ok(out)
}

/// Snapshot read transaction
pub struct ReadTx<'a> {
    snapshot: rocksdb::Snapshot<'a>,
}

impl Reader for ReadTx<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.snapshot.get(physical_key(bucket, key))?)
    }

    fn scan(&self, bucket: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let prefix = bucket_prefix(bucket);
        let iter = self
            .snapshot
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        scan_prefix(iter, &prefix)
    }
}

/// Buffered write transaction; reads see its own pending writes
pub struct WriteTx<'a> {
    db: &'a DB,
    /// Physical key → `Some(value)` for a put, `None` for a delete
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteTx<'_> {
    pub fn put(&mut self, bucket: &str, key: &[u8], value: Vec<u8>) {
        self.pending.insert(physical_key(bucket, key), Some(value));
    }

    pub fn delete(&mut self, bucket: &str, key: &[u8]) {
        self.pending.insert(physical_key(bucket, key), None);
    }

    fn commit(self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for (key, value) in self.pending {
            match value {
                Some(v) => batch.put(key, v),
                None => batch.delete(key),
            }
        }
        self.db.write(batch).map_err(StoreError::from)
    }
}

impl Reader for WriteTx<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let full = physical_key(bucket, key);
        if let Some(pending) = self.pending.get(&full) {
            return Ok(pending.clone());
        }
        Ok(self.db.get(full)?)
    }

    fn scan(&self, bucket: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let prefix = bucket_prefix(bucket);
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            scan_prefix(iter, &prefix)?.into_iter().collect();

        for (full, value) in self.pending.range(prefix.clone()..) {
            if !full.starts_with(&prefix) {
                break;
            }
            let key = full[prefix.len()..].to_vec();
            match value {
                Some(v) => {
                    merged.insert(key, v.clone());
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}
