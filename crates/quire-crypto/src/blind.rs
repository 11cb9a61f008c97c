//! Blind-index derivation
//!
//! An identifier (account name, user email) is stored only as
//! `salt ‖ scrypt(identifier, salt)`. Resolving it means re-deriving against
//! every stored salt and comparing in constant time; nothing reversible is kept.

use subtle::ConstantTimeEq;

use crate::error::CryptoResult;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{Salt, SymmetricKey};
use crate::{KEY_SIZE, SALT_SIZE};

/// Stored blind-index key material: `[32-byte salt][32-byte derived key]`
pub struct BlindEntry {
    salt: Salt,
    derived: SymmetricKey,
}

/// Derive a fresh salt and the matching blind key for `name`.
pub fn derive_key_and_salt(name: &[u8], params: &KdfParams) -> CryptoResult<BlindEntry> {
    let salt = Salt::generate();
    let derived = derive_key(name, &salt, params)?;
    Ok(BlindEntry { salt, derived })
}

impl BlindEntry {
    pub const LEN: usize = SALT_SIZE + KEY_SIZE;

    /// Parse stored key material. `None` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let (salt_bytes, key_bytes) = bytes.split_at(SALT_SIZE);
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(salt_bytes);
        let mut derived = [0u8; KEY_SIZE];
        derived.copy_from_slice(key_bytes);
        Some(Self {
            salt: Salt::from_bytes(salt),
            derived: SymmetricKey::from_bytes(derived),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(self.salt.as_bytes());
        out.extend_from_slice(self.derived.as_bytes());
        out
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Re-derive `name` under this entry's salt and compare in constant time.
    pub fn matches(&self, name: &[u8], params: &KdfParams) -> CryptoResult<bool> {
        let candidate = derive_key(name, &self.salt, params)?;
        Ok(candidate.as_bytes().ct_eq(self.derived.as_bytes()).into())
    }
}

impl std::fmt::Debug for BlindEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlindEntry")
            .field("salt", &self.salt)
            .field("derived", &"[REDACTED]")
            .finish()
    }
}
