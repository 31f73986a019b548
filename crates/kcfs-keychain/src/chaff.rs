//! Decoy links
//!
//! A decoy is a link between two random keys, both tagged with the invalid
//! algorithm. Its record is the same size and shape as a real link, so
//! sprinkling decoys into a store hides how many real chains it holds.

use kcfs_core::config::ChaffConfig;
use kcfs_core::{KeyAlgorithm, KeyId, KeychainError, KeychainResult};
use kcfs_crypto::Key;
use rand::Rng;

use crate::mutate::insert_link;
use crate::store::ChainStore;

/// Slot collisions tolerated per `inject` call before giving up.
const MAX_COLLISIONS: usize = 8;

/// Bounds for the number of decoys to add in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChaffRange {
    min: u32,
    max: u32,
}

impl ChaffRange {
    /// Both bounds must be positive and `min < max`.
    pub fn new(min: i64, max: i64) -> KeychainResult<Self> {
        let bound = |name: &str, value: i64| {
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| {
                    KeychainError::Usage(format!("invalid {name} bound argument: {value}"))
                })
        };
        let min = bound("lower", min)?;
        let max = bound("upper", max)?;
        if min >= max {
            return Err(KeychainError::Usage(format!(
                "invalid arguments: lower bound ({min}) >= upper bound ({max})"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn from_config(config: &ChaffConfig) -> KeychainResult<Self> {
        Self::new(config.min, config.max)
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Number of decoy links to add: a uniform draw from `[min, max)` keys,
    /// halved since every link spends two keys, and never less than one.
    pub fn pick(&self) -> usize {
        let keys = rand::thread_rng().gen_range(self.min..self.max);
        ((keys / 2) as usize).max(1)
    }
}

/// Add `count` decoy links to the store.
///
/// Goes through the low-level insert, skipping the successor check real
/// links get. A decoy landing on an occupied slot is discarded, not counted,
/// and redrawn; after `MAX_COLLISIONS` such draws the `ChainExists` error is
/// returned, with the decoys added so far left in the store.
pub fn inject(store: &mut ChainStore, count: usize) -> KeychainResult<Vec<(KeyId, KeyId)>> {
    inject_with(store, count, || {
        Ok((
            Key::random(KeyAlgorithm::Invalid)?,
            Key::random(KeyAlgorithm::Invalid)?,
        ))
    })
}

fn inject_with<F>(
    store: &mut ChainStore,
    count: usize,
    mut draw: F,
) -> KeychainResult<Vec<(KeyId, KeyId)>>
where
    F: FnMut() -> KeychainResult<(Key, Key)>,
{
    if count == 0 {
        return Err(KeychainError::Usage("decoy count must be positive".into()));
    }

    let mut added = Vec::with_capacity(count);
    let mut collisions = 0;
    while added.len() < count {
        let (parent, child) = draw()?;

        match insert_link(store, &parent, &child) {
            Ok(()) => {
                tracing::trace!(parent = %parent.id(), child = %child.id(), "decoy link set");
                added.push((parent.id(), child.id()));
            }
            Err(KeychainError::ChainExists { parent, .. }) if collisions < MAX_COLLISIONS => {
                collisions += 1;
                tracing::warn!(%parent, "decoy collided with an existing link, redrawing");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(count = added.len(), total = store.len(), "decoy links added");
    Ok(added)
}
