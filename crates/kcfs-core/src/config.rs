use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::ChainMode;

/// Top-level configuration (loaded from kcfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KcfsConfig {
    pub log: LogConfig,
    pub keys: KeysConfig,
    pub chain: ChainConfig,
    pub chaff: ChaffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Key derivation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Algorithm name (default: aes256-xts)
    pub algorithm: String,
    /// Argon2id time cost (iterations, default: 3); must be positive
    pub iterations: i64,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Keyfile mixed into every derivation
    pub keyfile: Option<PathBuf>,
    /// Derive from the keyfile alone, without prompting for a passphrase
    pub no_passphrase: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Resolution mode for key commands: "use" or "ignore-missing"
    pub mode: ChainMode,
}

/// Decoy link count bounds for `randomchain`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaffConfig {
    /// Lower bound (inclusive), must be positive
    pub min: i64,
    /// Upper bound (exclusive), must be greater than `min`
    pub max: i64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            algorithm: "aes256-xts".into(),
            iterations: 3,
            argon2_mem_cost_kib: 65536,
            argon2_parallelism: 4,
            keyfile: None,
            no_passphrase: false,
        }
    }
}

impl Default for ChaffConfig {
    fn default() -> Self {
        Self { min: 16, max: 64 }
    }
}
