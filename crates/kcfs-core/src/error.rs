use std::path::PathBuf;

use thiserror::Error;

use crate::types::KeyId;

pub type KeychainResult<T> = Result<T, KeychainError>;

#[derive(Debug, Error)]
pub enum KeychainError {
    /// Malformed parameters; raised before the store is touched.
    #[error("usage error: {0}")]
    Usage(String),

    #[error("unsupported algorithm: {name} (valid: {})", valid.join(", "))]
    UnsupportedAlgorithm {
        name: String,
        valid: Vec<&'static str>,
    },

    /// A link was found but could not be decrypted or failed its integrity check.
    #[error("invalid key chain at {id}: {reason}")]
    InvalidChain { id: KeyId, reason: String },

    #[error("key chain is already set: {parent} -> {child}")]
    ChainExists { parent: KeyId, child: KeyId },

    #[error("key chain not found: {id}")]
    NotFound { id: KeyId },

    /// Cycles, identifier collisions, malformed store records.
    #[error("key chain store corrupted: {0}")]
    Corrupted(String),

    #[error("key chain store {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl KeychainError {
    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }

    /// Errors caused by bad input rather than by the environment.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedAlgorithm { .. }
                | Self::InvalidChain { .. }
                | Self::ChainExists { .. }
                | Self::NotFound { .. }
                | Self::Corrupted(_)
        )
    }
}
