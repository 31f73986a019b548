//! Chain resolution: follow links from a root key, one decryption per hop

use std::collections::HashSet;

use kcfs_core::{ChainMode, KeyId, KeychainError, KeychainResult};
use kcfs_crypto::{decrypt_link, Key};

use crate::store::ChainStore;

/// Keys reachable from a root, in root-to-leaf order.
///
/// Never empty: the first element is always the root.
#[derive(Debug, Clone)]
pub struct Chain {
    keys: Vec<Key>,
}

impl Chain {
    /// A chain of just `root`, without consulting any store.
    pub fn single(root: Key) -> Self {
        Self { keys: vec![root] }
    }

    pub fn root(&self) -> &Key {
        &self.keys[0]
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Key> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; present for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether the root links to at least one real key.
    pub fn has_successor(&self) -> bool {
        self.keys.len() > 1
    }

    pub fn ids(&self) -> Vec<KeyId> {
        self.keys.iter().map(Key::id).collect()
    }

    pub fn into_keys(self) -> Vec<Key> {
        self.keys
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Resolve the chain starting at `root`.
///
/// Only the root lookup is subject to `mode`: under `ChainMode::Use` a root
/// without a link is `NotFound`. Past the root, a missing link simply ends
/// the chain, as does a link to a terminal key. Decryption failures are
/// `InvalidChain`; a repeated identifier is `Corrupted`.
pub fn resolve(store: &ChainStore, root: &Key, mode: ChainMode) -> KeychainResult<Chain> {
    let mut keys = vec![root.clone()];
    let mut visited = HashSet::from([root.id()]);

    loop {
        let tail = &keys[keys.len() - 1];
        let Some(link) = store.lookup(tail.id()) else {
            if keys.len() == 1 && mode == ChainMode::Use {
                return Err(KeychainError::NotFound { id: tail.id() });
            }
            break;
        };

        let child = decrypt_link(tail, link.record())?;
        if child.is_terminal() {
            tracing::trace!(id = %tail.id(), "chain sealed");
            break;
        }
        if !visited.insert(child.id()) {
            return Err(KeychainError::Corrupted(format!(
                "key chain loop: {} -> {}",
                tail.id(),
                child.id()
            )));
        }
        tracing::trace!(parent = %tail.id(), child = %child.id(), "chain hop");
        keys.push(child);
    }

    tracing::debug!(root = %root.id(), len = keys.len(), "resolved key chain");
    Ok(Chain { keys })
}
