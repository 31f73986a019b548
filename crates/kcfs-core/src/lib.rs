pub mod config;
pub mod error;
pub mod types;

pub use error::{KeychainError, KeychainResult};
pub use types::{ChainMode, KeyAlgorithm, KeyId};

/// Name of the key chain store, relative to the filesystem root.
pub const KEYCHAIN_DB_FILE: &str = ".kcfs-keychain";
