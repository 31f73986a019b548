//! Key chain store: encrypted chain links for one filesystem root.
//!
//! The store lives at `<fsroot>/.kcfs-keychain` as a JSON document mapping
//! parent key identifiers (16 hex digits) to base64 link records. Every record
//! has the same length whether it links real keys, seals a chain or is a
//! decoy, so the file reveals how many links exist but not which are real.
//!
//! The whole document is loaded into memory and flushed atomically via
//! temp+rename. Concurrent invocations coordinate through an advisory lock on
//! the sidecar `.kcfs-keychain.lock`: shared for lookups, exclusive for
//! read-modify-write. The lock is held for the lifetime of the `ChainStore`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kcfs_core::{KeyId, KeychainError, KeychainResult, KEYCHAIN_DB_FILE};
use kcfs_crypto::LINK_RECORD_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const STORE_VERSION: u32 = 1;

/// One encrypted link, keyed by the identifier of the key that decrypts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    parent: KeyId,
    record: Vec<u8>,
}

impl ChainLink {
    pub fn new(parent: KeyId, record: Vec<u8>) -> KeychainResult<Self> {
        if record.len() != LINK_RECORD_SIZE {
            return Err(KeychainError::Corrupted(format!(
                "link record for {parent} has {} bytes (expected {LINK_RECORD_SIZE})",
                record.len()
            )));
        }
        Ok(Self { parent, record })
    }

    pub fn parent(&self) -> KeyId {
        self.parent
    }

    pub fn record(&self) -> &[u8] {
        &self.record
    }
}

/// How the store is locked while open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Lookups only; other readers may hold the store concurrently.
    Shared,
    /// Lookups and mutations; excludes every other handle.
    Exclusive,
}

/// On-disk representation
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    links: BTreeMap<String, String>,
}

/// In-memory view of the store, persisted to a JSON file
pub struct ChainStore {
    /// Path to the store file
    db_path: PathBuf,
    /// parent id → link
    links: BTreeMap<KeyId, ChainLink>,
    /// Whether there are unsaved changes
    dirty: bool,
    mode: LockMode,
    /// Held open for the advisory lock; released on drop.
    _lock: Option<File>,
}

impl ChainStore {
    /// Path of the store file for a filesystem root.
    pub fn path_for(fsroot: &Path) -> PathBuf {
        fsroot.join(KEYCHAIN_DB_FILE)
    }

    /// Path of the sidecar lock file for a filesystem root.
    ///
    /// Created by any open, so its presence marks a directory as a root.
    pub fn lock_path_for(fsroot: &Path) -> PathBuf {
        Self::path_for(fsroot).with_extension("lock")
    }

    /// Lock and load the store for `fsroot`.
    ///
    /// A missing store file is an empty store. A shared open on a root
    /// where the lock file cannot be created (read-only media) proceeds
    /// without a lock, since nothing can write there either.
    pub fn open(fsroot: &Path, mode: LockMode) -> KeychainResult<Self> {
        let db_path = Self::path_for(fsroot);
        let lock = acquire_lock(&Self::lock_path_for(fsroot), mode)?;
        let links = load_links(&db_path)?;

        tracing::debug!(
            path = %db_path.display(),
            links = links.len(),
            mode = ?mode,
            "opened key chain store"
        );

        Ok(ChainStore {
            db_path,
            links,
            dirty: false,
            mode,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Look up the link keyed by a parent identifier.
    pub fn lookup(&self, parent: KeyId) -> Option<&ChainLink> {
        self.links.get(&parent)
    }

    /// Insert a link into an empty slot.
    ///
    /// Returns `Ok(false)` without modifying the store if the parent already
    /// has a link.
    pub fn insert(&mut self, link: ChainLink) -> KeychainResult<bool> {
        self.ensure_writable()?;
        if self.links.contains_key(&link.parent) {
            return Ok(false);
        }
        self.links.insert(link.parent, link);
        self.dirty = true;
        Ok(true)
    }

    /// Remove the link keyed by a parent identifier.
    pub fn remove(&mut self, parent: KeyId) -> KeychainResult<Option<ChainLink>> {
        self.ensure_writable()?;
        let removed = self.links.remove(&parent);
        if removed.is_some() {
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Total number of links, decoys included
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Identifiers of every link owner.
    pub fn parents(&self) -> impl Iterator<Item = KeyId> + '_ {
        self.links.keys().copied()
    }

    /// Flush dirty changes to disk using an atomic write (write then rename).
    pub fn flush(&mut self) -> KeychainResult<()> {
        if !self.dirty {
            return Ok(());
        }

        let file = StoreFile {
            version: STORE_VERSION,
            links: self
                .links
                .values()
                .map(|link| (link.parent.to_string(), STANDARD.encode(&link.record)))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| KeychainError::Corrupted(format!("serializing key chain store: {e}")))?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.db_path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path).map_err(|e| KeychainError::store(&tmp_path, e))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.sync_all())
            .map_err(|e| KeychainError::store(&tmp_path, e))?;
        drop(tmp);
        std::fs::rename(&tmp_path, &self.db_path)
            .map_err(|e| KeychainError::store(&self.db_path, e))?;

        tracing::debug!(
            path = %self.db_path.display(),
            links = self.links.len(),
            "flushed key chain store"
        );
        self.dirty = false;
        Ok(())
    }

    fn ensure_writable(&self) -> KeychainResult<()> {
        match self.mode {
            LockMode::Exclusive => Ok(()),
            LockMode::Shared => Err(KeychainError::Usage(format!(
                "key chain store {} is open read-only",
                self.db_path.display()
            ))),
        }
    }
}

impl Drop for ChainStore {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush key chain store on drop: {e}");
            }
        }
    }
}

fn acquire_lock(lock_path: &Path, mode: LockMode) -> KeychainResult<Option<File>> {
    let file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(e)
            if mode == LockMode::Shared
                && matches!(
                    e.kind(),
                    ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem
                ) =>
        {
            tracing::debug!(
                path = %lock_path.display(),
                "lock file unavailable, reading unlocked: {e}"
            );
            return Ok(None);
        }
        Err(e) => return Err(KeychainError::store(lock_path, e)),
    };

    let locked = match mode {
        LockMode::Shared => file.lock_shared(),
        LockMode::Exclusive => file.lock(),
    };
    locked.map_err(|e| KeychainError::store(lock_path, e))?;
    Ok(Some(file))
}

fn load_links(db_path: &Path) -> KeychainResult<BTreeMap<KeyId, ChainLink>> {
    let content = match std::fs::read(db_path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(KeychainError::store(db_path, e)),
    };

    let file: StoreFile = serde_json::from_slice(&content).map_err(|e| {
        KeychainError::Corrupted(format!("parsing {}: {e}", db_path.display()))
    })?;
    if file.version != STORE_VERSION {
        return Err(KeychainError::Corrupted(format!(
            "{}: unsupported store version {}",
            db_path.display(),
            file.version
        )));
    }

    file.links
        .into_iter()
        .map(|(parent_hex, record_b64)| {
            let parent = KeyId::from_hex(&parent_hex).ok_or_else(|| {
                KeychainError::Corrupted(format!("invalid key identifier: {parent_hex}"))
            })?;
            let record = STANDARD.decode(&record_b64).map_err(|e| {
                KeychainError::Corrupted(format!("link record for {parent}: {e}"))
            })?;
            Ok((parent, ChainLink::new(parent, record)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::TryLockError;
    use tempfile::TempDir;

    fn link(parent: u64, fill: u8) -> ChainLink {
        ChainLink::new(KeyId::new(parent), vec![fill; LINK_RECORD_SIZE]).unwrap()
    }

    #[test]
    fn test_missing_store_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();
        assert!(store.is_empty());
        assert!(store.lookup(KeyId::new(1)).is_none());
        assert!(!ChainStore::path_for(tmp.path()).exists());
    }

    #[test]
    fn test_insert_lookup_remove() {
        let tmp = TempDir::new().unwrap();
        let mut store = ChainStore::open(tmp.path(), LockMode::Exclusive).unwrap();

        assert!(store.insert(link(1, 0xAA)).unwrap());
        assert_eq!(store.lookup(KeyId::new(1)).unwrap().record()[0], 0xAA);
        assert_eq!(store.len(), 1);

        let removed = store.remove(KeyId::new(1)).unwrap();
        assert!(removed.is_some());
        assert!(store.remove(KeyId::new(1)).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_insert_does_not_overwrite() {
        let tmp = TempDir::new().unwrap();
        let mut store = ChainStore::open(tmp.path(), LockMode::Exclusive).unwrap();

        assert!(store.insert(link(7, 1)).unwrap());
        assert!(!store.insert(link(7, 2)).unwrap());
        assert_eq!(store.lookup(KeyId::new(7)).unwrap().record()[0], 1);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = ChainStore::open(tmp.path(), LockMode::Exclusive).unwrap();
            store.insert(link(0xdead_beef, 9)).unwrap();
            store.insert(link(u64::MAX, 8)).unwrap();
            store.flush().unwrap();
        }

        let store = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup(KeyId::new(0xdead_beef)).unwrap().record()[0], 9);
        let parents: Vec<_> = store.parents().collect();
        assert_eq!(parents, vec![KeyId::new(0xdead_beef), KeyId::new(u64::MAX)]);
    }

    #[test]
    fn test_drop_flushes_dirty_store() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = ChainStore::open(tmp.path(), LockMode::Exclusive).unwrap();
            store.insert(link(5, 5)).unwrap();
        }
        let store = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();
        assert!(store.lookup(KeyId::new(5)).is_some());
    }

    #[test]
    fn test_shared_store_is_read_only() {
        let tmp = TempDir::new().unwrap();
        let mut store = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();
        assert!(matches!(store.insert(link(1, 1)), Err(KeychainError::Usage(_))));
        assert!(matches!(store.remove(KeyId::new(1)), Err(KeychainError::Usage(_))));
    }

    #[test]
    fn test_shared_readers_coexist() {
        let tmp = TempDir::new().unwrap();
        let a = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();
        let b = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();
        assert_eq!(a.len(), b.len());
    }

    fn open_lock_file(tmp: &TempDir) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(ChainStore::lock_path_for(tmp.path()))
            .unwrap()
    }

    #[test]
    fn test_exclusive_store_blocks_readers() {
        let tmp = TempDir::new().unwrap();
        let store = ChainStore::open(tmp.path(), LockMode::Exclusive).unwrap();

        let other = open_lock_file(&tmp);
        assert!(matches!(other.try_lock_shared(), Err(TryLockError::WouldBlock)));
        assert!(matches!(other.try_lock(), Err(TryLockError::WouldBlock)));

        drop(store);
        other.try_lock_shared().unwrap();
    }

    #[test]
    fn test_shared_store_blocks_writers() {
        let tmp = TempDir::new().unwrap();
        let store = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();

        let other = open_lock_file(&tmp);
        assert!(matches!(other.try_lock(), Err(TryLockError::WouldBlock)));
        other.try_lock_shared().unwrap();
        other.unlock().unwrap();

        drop(store);
        other.try_lock().unwrap();
    }

    #[test]
    fn test_wrong_record_size_rejected() {
        let result = ChainLink::new(KeyId::new(1), vec![0; LINK_RECORD_SIZE - 1]);
        assert!(matches!(result, Err(KeychainError::Corrupted(_))));
    }

    #[test]
    fn test_corrupt_store_file() {
        let tmp = TempDir::new().unwrap();
        let path = ChainStore::path_for(tmp.path());

        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            ChainStore::open(tmp.path(), LockMode::Shared),
            Err(KeychainError::Corrupted(_))
        ));

        std::fs::write(&path, br#"{"version": 9, "links": {}}"#).unwrap();
        assert!(matches!(
            ChainStore::open(tmp.path(), LockMode::Shared),
            Err(KeychainError::Corrupted(_))
        ));

        std::fs::write(&path, br#"{"version": 1, "links": {"xyz": "AAAA"}}"#).unwrap();
        assert!(matches!(
            ChainStore::open(tmp.path(), LockMode::Shared),
            Err(KeychainError::Corrupted(_))
        ));

        let record = STANDARD.encode([0u8; LINK_RECORD_SIZE]);
        let signed = format!(r#"{{"version": 1, "links": {{"+000000000000001": "{record}"}}}}"#);
        std::fs::write(&path, signed).unwrap();
        assert!(matches!(
            ChainStore::open(tmp.path(), LockMode::Shared),
            Err(KeychainError::Corrupted(msg)) if msg.contains("+000000000000001")
        ));
    }

    #[test]
    fn test_unreadable_root_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let missing_root = tmp.path().join("no-such-dir");
        assert!(matches!(
            ChainStore::open(&missing_root, LockMode::Exclusive),
            Err(KeychainError::Store { .. })
        ));
    }
}
