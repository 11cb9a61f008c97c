use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wrong key, wrong passphrase, truncated input or tampered ciphertext.
    /// Deliberately carries no detail.
    #[error("authentication failed")]
    Authentication,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encryption,
}
