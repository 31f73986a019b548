//! Interface to the keyring that consumes resolved keys.
//!
//! The keyring is an external collaborator: the filesystem driver, a
//! platform keychain, or `MemoryKeyring` in tests. Each request is a single
//! synchronous call. Connecting (loading a driver, opening a session) is the
//! implementation's constructor, not something the key chain code does.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kcfs_core::{KeyId, KeychainError, KeychainResult};
use kcfs_crypto::Key;

use crate::resolve::Chain;

pub trait Keyring {
    /// Make a key available. Adding a key that is already present is a no-op.
    fn add_key(&mut self, key: &Key) -> KeychainResult<()>;

    /// Withdraw a key; `NotFound` if it was not present.
    fn remove_key(&mut self, key: &Key) -> KeychainResult<()>;

    /// Bind an installed key to a path; `NotFound` if the key is not installed.
    fn set_path_key(&mut self, path: &Path, key: &Key) -> KeychainResult<()>;

    /// Key at `index`, with its index set; `None` past the last key.
    fn key_at(&self, index: u32) -> KeychainResult<Option<Key>>;

    /// Key bound to `path`, if any.
    fn path_key(&self, path: &Path) -> KeychainResult<Option<Key>>;

    /// Remove every key and binding.
    fn flush(&mut self) -> KeychainResult<()>;

    /// All installed keys in index order.
    fn keys(&self) -> KeychainResult<Vec<Key>> {
        let mut keys = Vec::new();
        let mut index = 0;
        while let Some(key) = self.key_at(index)? {
            keys.push(key);
            index += 1;
        }
        Ok(keys)
    }
}

/// Install every key of a chain, root first.
///
/// Stops at the first failure and returns it; keys installed before the
/// failure stay installed. There is no rollback.
pub fn install_chain<K: Keyring + ?Sized>(
    keyring: &mut K,
    chain: &Chain,
) -> KeychainResult<usize> {
    for (installed, key) in chain.iter().enumerate() {
        if let Err(e) = keyring.add_key(key) {
            tracing::warn!(id = %key.id(), installed, "cannot add key: {e}");
            return Err(e);
        }
        tracing::info!(id = %key.id(), "key added");
    }
    Ok(chain.len())
}

/// Remove every key of a chain, root first, carrying on past failures.
///
/// Returns the keys that could not be removed.
pub fn remove_chain<K: Keyring + ?Sized>(
    keyring: &mut K,
    chain: &Chain,
) -> Vec<(KeyId, KeychainError)> {
    let mut failures = Vec::new();
    for key in chain {
        match keyring.remove_key(key) {
            Ok(()) => tracing::info!(id = %key.id(), "key deleted"),
            Err(e) => {
                tracing::warn!(id = %key.id(), "cannot delete key: {e}");
                failures.push((key.id(), e));
            }
        }
    }
    failures
}

/// Process-local keyring.
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    keys: Vec<Key>,
    paths: BTreeMap<PathBuf, KeyId>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path bindings, for persisting the keyring elsewhere.
    pub fn bindings(&self) -> impl Iterator<Item = (&Path, KeyId)> + '_ {
        self.paths.iter().map(|(path, id)| (path.as_path(), *id))
    }

    fn position(&self, id: KeyId) -> Option<usize> {
        self.keys.iter().position(|k| k.id() == id)
    }
}

impl Keyring for MemoryKeyring {
    fn add_key(&mut self, key: &Key) -> KeychainResult<()> {
        if let Some(pos) = self.position(key.id()) {
            return if self.keys[pos].matches(key)? {
                Ok(())
            } else {
                Err(KeychainError::Keyring(format!("key {} is already installed", key.id())))
            };
        }
        self.keys.push(key.clone());
        Ok(())
    }

    fn remove_key(&mut self, key: &Key) -> KeychainResult<()> {
        let pos = self
            .position(key.id())
            .ok_or(KeychainError::NotFound { id: key.id() })?;
        self.keys.remove(pos);
        self.paths.retain(|_, id| *id != key.id());
        Ok(())
    }

    fn set_path_key(&mut self, path: &Path, key: &Key) -> KeychainResult<()> {
        if self.position(key.id()).is_none() {
            return Err(KeychainError::NotFound { id: key.id() });
        }
        self.paths.insert(path.to_path_buf(), key.id());
        Ok(())
    }

    fn key_at(&self, index: u32) -> KeychainResult<Option<Key>> {
        Ok(self
            .keys
            .get(index as usize)
            .map(|k| k.clone().with_index(index)))
    }

    fn path_key(&self, path: &Path) -> KeychainResult<Option<Key>> {
        let Some(id) = self.paths.get(path) else {
            return Ok(None);
        };
        Ok(self
            .position(*id)
            .map(|pos| self.keys[pos].clone().with_index(pos as u32)))
    }

    fn flush(&mut self) -> KeychainResult<()> {
        self.keys.clear();
        self.paths.clear();
        Ok(())
    }
}
