use thiserror::Error;

pub type QuireResult<T> = Result<T, QuireError>;

#[derive(Debug, Error)]
pub enum QuireError {
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
