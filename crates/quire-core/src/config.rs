use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{QuireError, QuireResult};

/// Top-level daemon configuration (loaded from quire.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub tls: TlsConfig,
}

impl QuireConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> QuireResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| QuireError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Where the server certificate is written on startup
    pub fn cert_path(&self) -> PathBuf {
        self.tls
            .cert_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("cert.pem"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TLS listen address for the RPC endpoint (default: 127.0.0.1:7443)
    pub listen: String,
    /// Prometheus metrics endpoint, plain HTTP (disabled when unset)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Client tokens kept at once; further handshakes are dropped (default: 4096)
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding master.db and one store per scope
    pub data_dir: PathBuf,
}

/// scrypt cost parameters for every passphrase and blind-index derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// log2 of the scrypt CPU/memory cost N (default: 14, N = 16384)
    pub scrypt_log_n: u8,
    /// scrypt block size r (default: 8)
    pub scrypt_r: u32,
    /// scrypt parallelism p (default: 1)
    pub scrypt_p: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Certificate output path (default: <data_dir>/cert.pem)
    pub cert_path: Option<PathBuf>,
    /// Extra DNS names or IPs to include in the certificate
    pub extra_hosts: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7443".into(),
            metrics_addr: None,
            log_level: "info".into(),
            log_format: "text".into(),
            max_tokens: 4096,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            scrypt_log_n: 14,
            scrypt_r: 8,
            scrypt_p: 1,
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "quire")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./quire-data"))
}
