//! Key derivation: passphrase and/or keyfile → algorithm key via Argon2id

use std::path::PathBuf;

use argon2::{Algorithm, Argon2, Params, Version};
use kcfs_core::config::KeysConfig;
use kcfs_core::{KeyAlgorithm, KeychainError, KeychainResult};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::keys::{hkdf_derive, Key};
use crate::KEY_SIZE;

/// Fixed salt: identifiers must be reproducible from the passphrase alone,
/// so nothing per-filesystem can feed into the derivation.
const KDF_SALT: [u8; 16] = *b"kcfs-keychain-v1";

/// Argon2id cost parameters other than the iteration count
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            parallelism: 4,
        }
    }
}

/// Everything that selects which key a passphrase turns into.
#[derive(Debug, Clone)]
pub struct KeyParams {
    pub algorithm: String,
    /// Argon2id time cost; must be positive.
    pub iterations: i64,
    pub keyfile: Option<PathBuf>,
    /// Derive from the keyfile alone.
    pub no_passphrase: bool,
    pub kdf: KdfParams,
}

impl Default for KeyParams {
    fn default() -> Self {
        Self::from_config(&KeysConfig::default())
    }
}

impl KeyParams {
    pub fn from_config(config: &KeysConfig) -> Self {
        Self {
            algorithm: config.algorithm.clone(),
            iterations: config.iterations,
            keyfile: config.keyfile.clone(),
            no_passphrase: config.no_passphrase,
            kdf: KdfParams {
                mem_cost_kib: config.argon2_mem_cost_kib,
                parallelism: config.argon2_parallelism,
            },
        }
    }

    /// Check the parameters without doing any I/O or key stretching.
    pub fn validate(&self) -> KeychainResult<(KeyAlgorithm, u32)> {
        if self.iterations <= 0 {
            return Err(KeychainError::Usage(format!(
                "invalid iterations argument: {}",
                self.iterations
            )));
        }
        let time_cost = u32::try_from(self.iterations).map_err(|_| {
            KeychainError::Usage(format!("iterations out of range: {}", self.iterations))
        })?;

        let algorithm = KeyAlgorithm::from_name(&self.algorithm).ok_or_else(|| {
            KeychainError::UnsupportedAlgorithm {
                name: self.algorithm.clone(),
                valid: KeyAlgorithm::valid_names(),
            }
        })?;

        if self.no_passphrase && self.keyfile.is_none() {
            return Err(KeychainError::Usage(
                "a keyfile is required when the passphrase is suppressed".into(),
            ));
        }

        Ok((algorithm, time_cost))
    }
}

/// Supported algorithms, for display.
pub fn algorithms() -> impl Iterator<Item = KeyAlgorithm> {
    KeyAlgorithm::SUPPORTED.into_iter()
}

/// Derive a key from a passphrase and/or keyfile.
///
/// `passphrase` is ignored when `params.no_passphrase` is set and must be
/// present and non-empty otherwise. Every intermediate buffer is zeroized
/// before returning, whether derivation succeeds or not.
pub fn derive_key(passphrase: Option<&SecretString>, params: &KeyParams) -> KeychainResult<Key> {
    let (algorithm, time_cost) = params.validate()?;

    let passphrase: &[u8] = if params.no_passphrase {
        &[]
    } else {
        passphrase
            .map(|p| p.expose_secret().as_bytes())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| KeychainError::Usage("passphrase must not be empty".into()))?
    };
    let keyfile_digest = match &params.keyfile {
        Some(keyfile) => {
            let contents = Zeroizing::new(std::fs::read(keyfile).map_err(|e| {
                KeychainError::Usage(format!("cannot read keyfile {}: {e}", keyfile.display()))
            })?);
            Some(Zeroizing::new(*blake3::hash(&contents).as_bytes()))
        }
        None => None,
    };
    let ikm = keying_material(passphrase, keyfile_digest.as_deref());

    let argon2_params = Params::new(
        params.kdf.mem_cost_kib,
        time_cost,
        params.kdf.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| KeychainError::Usage(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut stretched = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(&ikm, &KDF_SALT, &mut stretched[..])
        .map_err(|e| KeychainError::Crypto(format!("Argon2id KDF failed: {e}")))?;

    let info = format!("kcfs-key:{}", algorithm.name());
    let secret = Zeroizing::new(hkdf_derive::<KEY_SIZE>(&stretched[..], info.as_bytes())?);
    let key = Key::from_secret(algorithm, *secret)?;

    tracing::debug!(id = %key.id(), algorithm = %algorithm, "derived key");
    Ok(key)
}

/// Passphrase bytes followed by the keyfile digest.
///
/// The buffer is allocated once at its final size: a regrow would free a copy
/// of the passphrase without wiping it.
fn keying_material(
    passphrase: &[u8],
    keyfile_digest: Option<&[u8; blake3::OUT_LEN]>,
) -> Zeroizing<Vec<u8>> {
    let digest: &[u8] = keyfile_digest.map_or(&[], |d| &d[..]);
    let mut ikm = Zeroizing::new(Vec::with_capacity(passphrase.len() + digest.len()));
    ikm.extend_from_slice(passphrase);
    ikm.extend_from_slice(digest);
    ikm
}
