//! Chain link records: a child key encrypted under its parent
//!
//! Record format (binary, fixed size):
//! ```text
//! [24 bytes: random nonce][73 bytes: ciphertext][16 bytes: Poly1305 tag]
//! plaintext = child id (8 bytes, BE) || algorithm tag (1 byte) || child secret (64 bytes)
//! AAD       = parent id (8 bytes, BE)
//! ```
//!
//! Real links, chain seals and decoys all encrypt a full 64-byte secret, so
//! every record in a store has exactly `LINK_RECORD_SIZE` bytes.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use kcfs_core::{KeyAlgorithm, KeyId, KeychainError, KeychainResult};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::keys::{derive_key_id, hkdf_derive, Key};
use crate::{KEY_SIZE, LINK_KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Size of the decrypted link payload
pub const LINK_PAYLOAD_SIZE: usize = 8 + 1 + KEY_SIZE;

/// Size of an encrypted link record on disk
pub const LINK_RECORD_SIZE: usize = NONCE_SIZE + LINK_PAYLOAD_SIZE + TAG_SIZE;

/// Encrypt `child` so that only the holder of `parent` can recover it.
///
/// Returns: `[24-byte nonce][ciphertext][16-byte tag]`
pub fn encrypt_link(parent: &Key, child: &Key) -> KeychainResult<Vec<u8>> {
    let cipher = link_cipher(parent)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let mut payload = Zeroizing::new(Vec::with_capacity(LINK_PAYLOAD_SIZE));
    payload.extend_from_slice(&child.id().to_bytes());
    payload.push(child.algorithm().to_byte());
    payload.extend_from_slice(child.secret());

    let aad = parent.id().to_bytes();
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &payload,
                aad: &aad,
            },
        )
        .map_err(|e| KeychainError::Crypto(format!("link encryption failed: {e}")))?;

    let mut record = Vec::with_capacity(LINK_RECORD_SIZE);
    record.extend_from_slice(&nonce_bytes);
    record.extend_from_slice(&ciphertext);
    Ok(record)
}

/// Decrypt a link record with the parent key, returning the child.
///
/// Wrong key and tampered records are `InvalidChain`. A child whose stored
/// identifier does not match its secret is reported as corruption; chain
/// terminators and decoys are exempt since their identifiers carry no meaning.
pub fn decrypt_link(parent: &Key, record: &[u8]) -> KeychainResult<Key> {
    if record.len() != LINK_RECORD_SIZE {
        return Err(KeychainError::InvalidChain {
            id: parent.id(),
            reason: format!(
                "link record has wrong size: {} bytes (expected {})",
                record.len(),
                LINK_RECORD_SIZE
            ),
        });
    }

    let (nonce_bytes, ciphertext) = record.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = link_cipher(parent)?;

    let aad = parent.id().to_bytes();
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| KeychainError::InvalidChain {
                id: parent.id(),
                reason: "link decryption failed: wrong key or corrupted record".into(),
            })?,
    );

    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&plaintext[..8]);
    let child_id = KeyId::from_bytes(id_bytes);

    let algorithm =
        KeyAlgorithm::from_byte(plaintext[8]).ok_or_else(|| KeychainError::InvalidChain {
            id: parent.id(),
            reason: format!("unknown algorithm tag {}", plaintext[8]),
        })?;

    let mut secret = Zeroizing::new([0u8; KEY_SIZE]);
    secret.copy_from_slice(&plaintext[9..]);

    if algorithm.is_valid() && derive_key_id(&secret)? != child_id {
        return Err(KeychainError::Corrupted(format!(
            "identifier mismatch in link {} -> {}",
            parent.id(),
            child_id
        )));
    }

    Ok(Key::from_parts(child_id, algorithm, *secret))
}

fn link_cipher(parent: &Key) -> KeychainResult<XChaCha20Poly1305> {
    let link_key = Zeroizing::new(hkdf_derive::<LINK_KEY_SIZE>(
        parent.secret(),
        b"kcfs-chain-link",
    )?);
    let link_key: &[u8; LINK_KEY_SIZE] = &link_key;
    Ok(XChaCha20Poly1305::new(link_key.into()))
}
