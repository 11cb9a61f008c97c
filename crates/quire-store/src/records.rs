//! Encrypted record buckets (notes, notebooks, tags, templates)
//!
//! Values are opaque payloads encrypted under the owning scope's key.

use quire_crypto::SymmetricKey;
use serde::{Deserialize, Serialize};

use crate::db::{buckets, Reader};
use crate::error::{StoreError, StoreResult};
use crate::registry::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Note,
    Notebook,
    Tag,
    Template,
}

impl RecordKind {
    pub const fn bucket(self) -> &'static str {
        match self {
            RecordKind::Note => buckets::NOTES,
            RecordKind::Notebook => buckets::NOTEBOOKS,
            RecordKind::Tag => buckets::TAGS,
            RecordKind::Template => buckets::TEMPLATES,
        }
    }
}

/// A decrypted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub data: Vec<u8>,
}

fn check_id(id: &str) -> StoreResult<()> {
    if id.is_empty() {
        return Err(StoreError::Invalid("record id must not be empty".into()));
    }
    Ok(())
}

/// Insert or replace record `id`.
pub fn save(handle: &Handle, key: &SymmetricKey, kind: RecordKind, id: &str, payload: &[u8]) -> StoreResult<()> {
    check_id(id)?;
    let encrypted = quire_crypto::encrypt(key, payload)?;
    handle.store().update(|tx| {
        tx.put(kind.bucket(), id.as_bytes(), encrypted);
        Ok(())
    })
}

/// Every record of `kind`, ordered by id. One undecryptable entry fails the whole listing.
pub fn load_all(handle: &Handle, key: &SymmetricKey, kind: RecordKind) -> StoreResult<Vec<Record>> {
    let bucket = kind.bucket();
    let entries = handle.store().view(|tx| tx.scan(bucket))?;

    entries
        .into_iter()
        .map(|(id, value)| {
            let id = String::from_utf8(id).map_err(|_| StoreError::corrupt(bucket, "record id is not UTF-8"))?;
            let data = quire_crypto::decrypt(key, &value)?;
            Ok(Record { id, data })
        })
        .collect()
}

/// Remove record `id`. Removing an absent record is not an error.
pub fn delete(handle: &Handle, kind: RecordKind, id: &str) -> StoreResult<()> {
    check_id(id)?;
    handle.store().update(|tx| {
        tx.delete(kind.bucket(), id.as_bytes());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use quire_core::{ScopeId, ScopeKey};
    use quire_crypto::KdfParams;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_delete() {
        let tmp = TempDir::new().unwrap();
        let reg = Registry::new(tmp.path(), KdfParams::insecure_fast()).unwrap();
        let handle = reg.get_handle(ScopeKey::shelf(ScopeId::generate())).unwrap();
        let key = SymmetricKey::generate();

        save(&handle, &key, RecordKind::Note, "b", b"second").unwrap();
        save(&handle, &key, RecordKind::Note, "a", b"first").unwrap();
        save(&handle, &key, RecordKind::Tag, "a", b"tag").unwrap();

        let notes = load_all(&handle, &key, RecordKind::Note).unwrap();
        assert_eq!(
            notes,
            vec![
                Record { id: "a".into(), data: b"first".to_vec() },
                Record { id: "b".into(), data: b"second".to_vec() },
            ]
        );

        delete(&handle, RecordKind::Note, "a").unwrap();
        delete(&handle, RecordKind::Note, "missing").unwrap();
        let notes = load_all(&handle, &key, RecordKind::Note).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(load_all(&handle, &key, RecordKind::Tag).unwrap().len(), 1);
    }

    #[test]
    fn test_payload_is_encrypted_at_rest() {
        let tmp = TempDir::new().unwrap();
        let reg = Registry::new(tmp.path(), KdfParams::insecure_fast()).unwrap();
        let handle = reg.get_handle(ScopeKey::user(ScopeId::generate())).unwrap();
        let key = SymmetricKey::generate();

        save(&handle, &key, RecordKind::Template, "t1", b"meeting notes template").unwrap();
        let raw = handle.store().view(|tx| tx.get(buckets::TEMPLATES, b"t1")).unwrap().unwrap();
        assert!(!raw.windows(7).any(|w| w == b"meeting"));
    }

    #[test]
    fn test_wrong_key_fails_whole_listing() {
        let tmp = TempDir::new().unwrap();
        let reg = Registry::new(tmp.path(), KdfParams::insecure_fast()).unwrap();
        let handle = reg.get_handle(ScopeKey::collection(ScopeId::generate())).unwrap();

        save(&handle, &SymmetricKey::generate(), RecordKind::Notebook, "nb", b"x").unwrap();
        let result = load_all(&handle, &SymmetricKey::generate(), RecordKind::Notebook);
        assert!(matches!(result, Err(StoreError::Crypto(_))));
    }

    #[test]
    fn test_empty_id_rejected() {
        let tmp = TempDir::new().unwrap();
        let reg = Registry::new(tmp.path(), KdfParams::insecure_fast()).unwrap();
        let handle = reg.get_handle(ScopeKey::shelf(ScopeId::generate())).unwrap();
        let key = SymmetricKey::generate();

        assert!(matches!(
            save(&handle, &key, RecordKind::Note, "", b"x"),
            Err(StoreError::Invalid(_))
        ));
    }
}
