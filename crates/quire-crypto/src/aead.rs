//! Symmetric authenticated encryption with XChaCha20-Poly1305
//!
//! Wire format:
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{Nonce, SymmetricKey};
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// Returns `[24-byte nonce][ciphertext][16-byte tag]`.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    encrypt_with_nonce(key, &Nonce::generate(), plaintext)
}

pub(crate) fn encrypt_with_nonce(
    key: &SymmetricKey,
    nonce: &Nonce,
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(nonce.as_bytes());
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`encrypt`].
///
/// Anything shorter than nonce + tag, a wrong key or a flipped bit yields
/// [`CryptoError::Authentication`]; no partial plaintext is ever returned.
pub fn decrypt(key: &SymmetricKey, encrypted: &[u8]) -> CryptoResult<Vec<u8>> {
    if encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Authentication);
    }

    let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SymmetricKey::generate();
        let plaintext = b"hello, encrypted world!";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = SymmetricKey::generate();

        let encrypted = encrypt(&key, b"").unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted, b"");
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let key1 = SymmetricKey::generate();
        let key2 = SymmetricKey::generate();

        let encrypted = encrypt(&key1, b"secret data").unwrap();
        let result = decrypt(&key2, &encrypted);

        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_encrypted_size() {
        let key = SymmetricKey::generate();
        let plaintext = vec![0u8; 1000];

        let encrypted = encrypt(&key, &plaintext).unwrap();

        // nonce (24) + plaintext (1000) + tag (16) = 1040
        assert_eq!(encrypted.len(), NONCE_SIZE + 1000 + TAG_SIZE);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = SymmetricKey::generate();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = SymmetricKey::generate();

        let mut encrypted = encrypt(&key, b"secret data").unwrap();
        encrypted[NONCE_SIZE + 1] ^= 0xFF;

        let result = decrypt(&key, &encrypted);
        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_truncated_input() {
        let key = SymmetricKey::generate();
        let encrypted = encrypt(&key, b"").unwrap();

        for len in 0..encrypted.len() {
            assert!(
                matches!(decrypt(&key, &encrypted[..len]), Err(CryptoError::Authentication)),
                "length {len} must fail closed"
            );
        }
    }
}
