//! Platform keychain as the keyring that receives resolved keys.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)
//!
//! Each filesystem root gets one keychain entry holding its installed keys
//! and path bindings as a JSON document. The entry is rewritten after every
//! change.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kcfs_core::{KeyAlgorithm, KeyId, KeychainError, KeychainResult};
use kcfs_crypto::{Key, KEY_SIZE};
use kcfs_keychain::{Keyring, MemoryKeyring};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

const SERVICE_NAME: &str = "kcfs";

#[derive(Serialize, Deserialize, Default)]
struct KeyringState {
    keys: Vec<StoredKey>,
    paths: Vec<(PathBuf, String)>,
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    algorithm: String,
    secret: String,
}

impl Drop for StoredKey {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

pub struct PlatformKeyring {
    entry: keyring::Entry,
    inner: MemoryKeyring,
}

impl PlatformKeyring {
    /// Open the keychain entry for `fsroot` and load the keys it holds.
    pub fn connect(fsroot: &Path) -> KeychainResult<Self> {
        let user = fsroot.to_string_lossy();
        let entry = keyring::Entry::new(SERVICE_NAME, &user)
            .map_err(|e| KeychainError::Keyring(format!("keychain entry creation: {e}")))?;

        let mut inner = MemoryKeyring::new();
        match entry.get_password() {
            Ok(json) => {
                let json = Zeroizing::new(json);
                let state: KeyringState = serde_json::from_str(&json).map_err(|e| {
                    KeychainError::Keyring(format!("keychain entry for '{user}': {e}"))
                })?;
                restore(&mut inner, &state)?;
            }
            Err(keyring::Error::NoEntry) => {}
            Err(e) => {
                return Err(KeychainError::Keyring(format!(
                    "keychain get for '{user}': {e}"
                )))
            }
        }

        tracing::debug!(
            fsroot = %fsroot.display(),
            keys = inner.keys()?.len(),
            "connected to platform keychain"
        );
        Ok(Self { entry, inner })
    }

    fn save(&self) -> KeychainResult<()> {
        let state = KeyringState {
            keys: self
                .inner
                .keys()?
                .iter()
                .map(|key| StoredKey {
                    algorithm: key.algorithm().name().to_string(),
                    secret: STANDARD.encode(key.secret()),
                })
                .collect(),
            paths: self
                .inner
                .bindings()
                .map(|(path, id)| (path.to_path_buf(), id.to_string()))
                .collect(),
        };

        if state.keys.is_empty() {
            return match self.entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(KeychainError::Keyring(format!("keychain delete: {e}"))),
            };
        }

        let json = serde_json::to_string(&state)
            .map(Zeroizing::new)
            .map_err(|e| KeychainError::Keyring(e.to_string()))?;
        self.entry
            .set_password(&json)
            .map_err(|e| KeychainError::Keyring(format!("keychain store: {e}")))
    }
}

fn restore(inner: &mut MemoryKeyring, state: &KeyringState) -> KeychainResult<()> {
    for stored in &state.keys {
        let algorithm = KeyAlgorithm::from_name(&stored.algorithm).ok_or_else(|| {
            KeychainError::Keyring(format!("unknown algorithm '{}'", stored.algorithm))
        })?;
        let decoded = Zeroizing::new(
            STANDARD
                .decode(&stored.secret)
                .map_err(|e| KeychainError::Keyring(format!("stored key: {e}")))?,
        );
        let mut secret: [u8; KEY_SIZE] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KeychainError::Keyring("stored key has the wrong length".into()))?;
        let key = Key::from_secret(algorithm, secret);
        secret.zeroize();
        inner.add_key(&key?)?;
    }

    let keys = inner.keys()?;
    for (path, id) in &state.paths {
        let id = KeyId::from_hex(id).ok_or_else(|| {
            KeychainError::Keyring(format!("stored binding for {}", path.display()))
        })?;
        if let Some(key) = keys.iter().find(|k| k.id() == id) {
            inner.set_path_key(path, key)?;
        }
    }
    Ok(())
}

impl Keyring for PlatformKeyring {
    fn add_key(&mut self, key: &Key) -> KeychainResult<()> {
        self.inner.add_key(key)?;
        self.save()
    }

    fn remove_key(&mut self, key: &Key) -> KeychainResult<()> {
        self.inner.remove_key(key)?;
        self.save()
    }

    fn set_path_key(&mut self, path: &Path, key: &Key) -> KeychainResult<()> {
        self.inner.set_path_key(path, key)?;
        self.save()
    }

    fn key_at(&self, index: u32) -> KeychainResult<Option<Key>> {
        self.inner.key_at(index)
    }

    fn path_key(&self, path: &Path) -> KeychainResult<Option<Key>> {
        self.inner.path_key(path)
    }

    fn flush(&mut self) -> KeychainResult<()> {
        self.inner.flush()?;
        self.save()
    }
}
