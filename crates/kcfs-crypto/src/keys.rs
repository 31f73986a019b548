//! Key material: identifiers, algorithm tags, zeroized secret buffers

use hkdf::Hkdf;
use kcfs_core::{KeyAlgorithm, KeyId, KeychainError, KeychainResult};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A key as handed to the keyring: identifier, algorithm and raw secret.
///
/// The secret buffer is zeroized on drop, so a key is wiped on every exit
/// path as soon as its owner lets go of it.
#[derive(Clone)]
pub struct Key {
    id: KeyId,
    algorithm: KeyAlgorithm,
    secret: [u8; KEY_SIZE],
    index: Option<u32>,
}

impl Key {
    /// Build a key from a raw secret, deriving its identifier.
    ///
    /// Bytes past the algorithm's key length are cleared.
    pub fn from_secret(
        algorithm: KeyAlgorithm,
        mut secret: [u8; KEY_SIZE],
    ) -> KeychainResult<Self> {
        let mut key = Self {
            id: KeyId::new(0),
            algorithm,
            secret,
            index: None,
        };
        secret.zeroize();
        if algorithm.is_valid() {
            key.secret[algorithm.key_len()..].zeroize();
        }
        key.id = derive_key_id(&key.secret)?;
        Ok(key)
    }

    /// Reassemble a key decoded from a link record. The identifier is taken as stored.
    pub(crate) fn from_parts(id: KeyId, algorithm: KeyAlgorithm, secret: [u8; KEY_SIZE]) -> Self {
        Self {
            id,
            algorithm,
            secret,
            index: None,
        }
    }

    /// A key with a random secret, unrelated to any passphrase.
    pub fn random(algorithm: KeyAlgorithm) -> KeychainResult<Self> {
        let mut secret = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::from_secret(algorithm, secret)
    }

    /// Terminal marker: random secret tagged with the invalid algorithm.
    pub fn terminal() -> KeychainResult<Self> {
        Self::random(KeyAlgorithm::Invalid)
    }

    pub fn id(&self) -> KeyId {
        self.id
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Whether this key closes a chain (or is a decoy) rather than naming a cipher.
    pub fn is_terminal(&self) -> bool {
        !self.algorithm.is_valid()
    }

    /// Full fixed-size secret buffer, as written into link records.
    pub fn secret(&self) -> &[u8; KEY_SIZE] {
        &self.secret
    }

    /// The meaningful prefix of the secret for this key's algorithm.
    pub fn key_material(&self) -> &[u8] {
        if self.algorithm.is_valid() {
            &self.secret[..self.algorithm.key_len()]
        } else {
            &self.secret
        }
    }

    /// Position in the keyring, if the key came from a keyring query.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Compare secrets without short-circuiting on the first differing byte.
    pub fn same_secret(&self, other: &Key) -> bool {
        self.secret
            .iter()
            .zip(other.secret.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Compare two keys by identifier, treating a shared identifier with a
    /// different secret as a collision.
    pub fn matches(&self, other: &Key) -> KeychainResult<bool> {
        if self.id != other.id {
            return Ok(false);
        }
        if self.same_secret(other) {
            Ok(true)
        } else {
            Err(KeychainError::Corrupted(format!(
                "key identifier collision: {}",
                self.id
            )))
        }
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("secret", &"[REDACTED]")
            .field("index", &self.index)
            .finish()
    }
}

/// Derive the 64-bit identifier of a secret via HKDF-SHA256.
pub fn derive_key_id(secret: &[u8; KEY_SIZE]) -> KeychainResult<KeyId> {
    let okm: [u8; 8] = hkdf_derive(secret, b"kcfs-keyid")?;
    Ok(KeyId::from_bytes(okm))
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
pub(crate) fn hkdf_derive<const N: usize>(ikm: &[u8], info: &[u8]) -> KeychainResult<[u8; N]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; N];
    hkdf.expand(info, &mut okm)
        .map_err(|e| KeychainError::Crypto(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}
