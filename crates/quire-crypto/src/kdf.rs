//! Key derivation: scrypt passphrase → 256-bit key

use scrypt::Params;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{Salt, SymmetricKey};
use crate::KEY_SIZE;

/// scrypt cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N (default: 14, N = 16384)
    pub log_n: u8,
    /// Block size (default: 8)
    pub r: u32,
    /// Parallelism (default: 1)
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use for stored data.
    pub const fn insecure_fast() -> Self {
        Self {
            log_n: 4,
            r: 8,
            p: 1,
        }
    }

    /// Reject parameters scrypt would refuse, before anything is derived with them.
    pub fn validate(&self) -> CryptoResult<()> {
        self.scrypt_params().map(|_| ())
    }

    fn scrypt_params(&self) -> CryptoResult<Params> {
        Params::new(self.log_n, self.r, self.p, KEY_SIZE)
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid scrypt params: {e}")))
    }
}

/// Derive a 256-bit key from a secret and salt using scrypt.
///
/// Deterministic: the same secret, salt and parameters always yield the same key.
pub fn derive_key(secret: &[u8], salt: &Salt, params: &KdfParams) -> CryptoResult<SymmetricKey> {
    let scrypt_params = params.scrypt_params()?;

    let mut key = [0u8; KEY_SIZE];
    if let Err(e) = scrypt::scrypt(secret, salt.as_bytes(), &scrypt_params, &mut key) {
        key.zeroize();
        return Err(CryptoError::KeyDerivation(e.to_string()));
    }

    Ok(SymmetricKey::from_bytes(key))
}
