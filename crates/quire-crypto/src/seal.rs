//! Passphrase sealing: derive a fresh key from a fresh salt, then encrypt
//!
//! Sealed format (binary):
//! ```text
//! [32 bytes: salt][24 bytes: nonce][N bytes: ciphertext][16 bytes: tag]
//! ```

use secrecy::{ExposeSecret, SecretString};

use crate::aead::{decrypt, encrypt};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_key, KdfParams};
use crate::keys::Salt;
use crate::{NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Seal `plaintext` under a passphrase.
///
/// The derived key lives only for the duration of this call.
pub fn seal(
    passphrase: &SecretString,
    plaintext: &[u8],
    params: &KdfParams,
) -> CryptoResult<Vec<u8>> {
    let salt = Salt::generate();
    let key = derive_key(passphrase.expose_secret().as_bytes(), &salt, params)?;
    let encrypted = encrypt(&key, plaintext)?;
    drop(key);

    let mut result = Vec::with_capacity(SALT_SIZE + encrypted.len());
    result.extend_from_slice(salt.as_bytes());
    result.extend_from_slice(&encrypted);
    Ok(result)
}

/// Open the output of [`seal`]: split off the salt, re-derive, decrypt.
pub fn open(passphrase: &SecretString, sealed: &[u8], params: &KdfParams) -> CryptoResult<Vec<u8>> {
    if sealed.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Authentication);
    }

    let (salt_bytes, encrypted) = sealed.split_at(SALT_SIZE);
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(salt_bytes);

    let key = derive_key(
        passphrase.expose_secret().as_bytes(),
        &Salt::from_bytes(salt),
        params,
    )?;
    decrypt(&key, encrypted)
}
