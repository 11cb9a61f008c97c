//! quire-crypto: primitives behind every quire scope
//!
//! Envelope model:
//! ```text
//! passphrase ──scrypt(salt)──► passphrase key
//!   └── Account / User key   Seal: [32 salt][24 nonce][ciphertext + 16 tag]
//!         └── Shelf key      Encrypt: [24 nonce][ciphertext + 16 tag]
//!               └── Collection key
//! ```
//!
//! All sizes are fixed at the type level (`SymmetricKey`, `Nonce`, `Salt`);
//! decryption fails closed with [`CryptoError::Authentication`].

pub mod aead;
pub mod blind;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod seal;

pub use aead::{decrypt, encrypt};
pub use blind::{derive_key_and_salt, BlindEntry};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, KdfParams};
pub use keys::{random_bytes, zero, Nonce, Salt, SymmetricKey};
pub use seal::{open, seal};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 32;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
