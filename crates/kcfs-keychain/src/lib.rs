//! kcfs-keychain: persistent key chains for an encrypted filesystem root
//!
//! A key chain lets one key unlock others: each link in the store is the
//! child key encrypted under its parent, filed under the parent's
//! identifier. Resolving a chain decrypts one hop at a time from the key the
//! caller derived.
//!
//! ```text
//! derive_key(passphrase) ──► Key ──► resolve ──► Chain ──► install_chain ──► Keyring
//!                                       ▲
//!                           ChainStore (<fsroot>/.kcfs-keychain)
//!                                       ▼
//!                           add_link / delete_chain / chaff::inject
//! ```
//!
//! Installing a resolved chain into a keyring is a sequence of independent
//! calls in root-to-leaf order. A failure part way leaves the earlier keys
//! installed.

pub mod chaff;
pub mod keyring;
pub mod mutate;
pub mod resolve;
pub mod store;

use std::path::{Path, PathBuf};

use kcfs_core::{ChainMode, KeyId, KeychainResult};
use kcfs_crypto::Key;

pub use chaff::ChaffRange;
pub use keyring::{install_chain, remove_chain, Keyring, MemoryKeyring};
pub use mutate::{ChainTarget, DeleteScope, RemovedLink};
pub use resolve::Chain;
pub use store::{ChainLink, ChainStore, LockMode};

/// Key chain operations bound to one filesystem root.
///
/// Each operation opens the store with the lock it needs and releases it on
/// return, so a `Keychain` can be kept around without holding the store.
#[derive(Debug, Clone)]
pub struct Keychain {
    fsroot: PathBuf,
}

impl Keychain {
    pub fn new(fsroot: impl Into<PathBuf>) -> Self {
        Self {
            fsroot: fsroot.into(),
        }
    }

    pub fn fsroot(&self) -> &Path {
        &self.fsroot
    }

    pub fn store_path(&self) -> PathBuf {
        ChainStore::path_for(&self.fsroot)
    }

    /// Resolve the chain rooted at `key`.
    pub fn get(&self, key: &Key, mode: ChainMode) -> KeychainResult<Chain> {
        let store = ChainStore::open(&self.fsroot, LockMode::Shared)?;
        resolve::resolve(&store, key, mode)
    }

    /// Link `parent` to a key or seal its chain.
    pub fn set(&self, parent: &Key, target: &ChainTarget) -> KeychainResult<()> {
        let mut store = ChainStore::open(&self.fsroot, LockMode::Exclusive)?;
        mutate::add_link(&mut store, parent, target)?;
        store.flush()
    }

    /// Delete the chain rooted at `key`, returning the removed hops.
    ///
    /// The root must have a link. Links removed before a failure are still
    /// written out.
    pub fn delete(&self, key: &Key, scope: DeleteScope) -> KeychainResult<Vec<RemovedLink>> {
        let mut store = ChainStore::open(&self.fsroot, LockMode::Exclusive)?;
        let chain = resolve::resolve(&store, key, ChainMode::Use)?;
        let result = mutate::delete_chain(&mut store, &chain, scope);
        store.flush()?;
        result
    }

    /// Add `count` decoy links.
    pub fn inject_chaff(&self, count: usize) -> KeychainResult<Vec<(KeyId, KeyId)>> {
        let mut store = ChainStore::open(&self.fsroot, LockMode::Exclusive)?;
        let added = chaff::inject(&mut store, count)?;
        store.flush()?;
        Ok(added)
    }

    /// Add a number of decoy links drawn from `range`.
    pub fn inject_chaff_in(&self, range: ChaffRange) -> KeychainResult<Vec<(KeyId, KeyId)>> {
        self.inject_chaff(range.pick())
    }

    /// Number of links in the store, decoys included.
    pub fn link_count(&self) -> KeychainResult<usize> {
        Ok(ChainStore::open(&self.fsroot, LockMode::Shared)?.len())
    }
}
