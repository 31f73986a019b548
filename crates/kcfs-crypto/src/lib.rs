//! kcfs-crypto: key material for the kcfs key chain store
//!
//! Derivation pipeline:
//! ```text
//! passphrase ‖ BLAKE3(keyfile) ──Argon2id(time_cost = iterations)──▶ 64-byte stretched
//!   └── HKDF-SHA256(info = "kcfs-key:<alg>") ──▶ algorithm secret (zero padded to 64 bytes)
//!         └── HKDF-SHA256(info = "kcfs-keyid") ──▶ 64-bit key identifier
//! ```
//!
//! Chain links:
//! ```text
//! link key = HKDF-SHA256(parent secret, info = "kcfs-chain-link")
//! record   = [24-byte nonce][XChaCha20-Poly1305(child id ‖ alg ‖ child secret)][16-byte tag]
//! AAD      = parent id (8 bytes, big-endian)
//! ```

pub mod kdf;
pub mod keys;
pub mod link;

pub use kdf::{algorithms, derive_key, KdfParams, KeyParams};
pub use keys::{derive_key_id, Key};
pub use link::{decrypt_link, encrypt_link, LINK_RECORD_SIZE};

/// Size of a raw key secret buffer in bytes (512-bit, the largest XTS key)
pub const KEY_SIZE: usize = 64;

/// Size of the symmetric key protecting one chain link (256-bit)
pub const LINK_KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
