//! Chain mutation: add, seal and delete single links

use kcfs_core::{ChainMode, KeyId, KeychainError, KeychainResult};
use kcfs_crypto::{encrypt_link, Key};

use crate::resolve::{resolve, Chain};
use crate::store::{ChainLink, ChainStore};

/// What a new link points at.
#[derive(Debug)]
pub enum ChainTarget {
    /// Link to a real key.
    Key(Key),
    /// Close the chain with a terminal marker.
    Seal,
}

/// How much of a resolved chain `delete_chain` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteScope {
    /// Only the root's link; the rest of the chain stays, orphaned.
    #[default]
    First,
    /// Every link from the root to the terminal element.
    Full,
}

/// A link removed by `delete_chain`, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedLink {
    pub parent: KeyId,
    /// The next key in the chain, or `None` for the terminal element.
    pub child: Option<KeyId>,
}

/// Link `parent` to `target`.
///
/// Fails with `ChainExists`, leaving the store as it was, if the parent
/// already owns a link (a seal included) or the child is already part of the
/// parent's chain.
pub fn add_link(
    store: &mut ChainStore,
    parent: &Key,
    target: &ChainTarget,
) -> KeychainResult<()> {
    let chain = resolve(store, parent, ChainMode::IgnoreMissing)?;

    let terminal;
    let child = match target {
        ChainTarget::Key(child) => {
            for key in &chain {
                if key.matches(child)? {
                    return Err(KeychainError::ChainExists {
                        parent: parent.id(),
                        child: child.id(),
                    });
                }
            }
            child
        }
        ChainTarget::Seal => {
            terminal = Key::terminal()?;
            &terminal
        }
    };

    if chain.has_successor() {
        return Err(KeychainError::ChainExists {
            parent: chain.keys()[0].id(),
            child: chain.keys()[1].id(),
        });
    }

    // A sealed parent resolves to itself alone but still owns its slot.
    insert_link(store, parent, child)?;

    if child.is_terminal() {
        tracing::info!(parent = %parent.id(), "key chain sealed");
    } else {
        tracing::info!(parent = %parent.id(), child = %child.id(), "key chain set");
    }
    Ok(())
}

/// Insert a link without consulting existing chains.
///
/// Only refuses to overwrite a link the parent already has. Used directly for
/// decoys, which are never resolved from a passphrase.
pub fn insert_link(store: &mut ChainStore, parent: &Key, child: &Key) -> KeychainResult<()> {
    let link = ChainLink::new(parent.id(), encrypt_link(parent, child)?)?;
    if store.insert(link)? {
        Ok(())
    } else {
        Err(KeychainError::ChainExists {
            parent: parent.id(),
            child: child.id(),
        })
    }
}

/// Remove the link owned by `parent`.
///
/// Returns whether a link was removed. With `require_present` a missing link
/// is `NotFound`; otherwise it is a no-op.
pub fn delete_link(
    store: &mut ChainStore,
    parent: &Key,
    require_present: bool,
) -> KeychainResult<bool> {
    match store.remove(parent.id())? {
        Some(_) => Ok(true),
        None if require_present => Err(KeychainError::NotFound { id: parent.id() }),
        None => Ok(false),
    }
}

/// Delete links of a resolved chain, root to leaf, stopping at the first failure.
///
/// Links removed before a failure stay removed.
pub fn delete_chain(
    store: &mut ChainStore,
    chain: &Chain,
    scope: DeleteScope,
) -> KeychainResult<Vec<RemovedLink>> {
    let keys = chain.keys();
    let mut removed = Vec::new();

    for (i, key) in keys.iter().enumerate() {
        let next = keys.get(i + 1).map(Key::id);
        let is_last = next.is_none();

        if let Err(e) = delete_link(store, key, !is_last) {
            tracing::warn!(
                parent = %key.id(),
                removed = removed.len(),
                "key chain deletion stopped: {e}"
            );
            return Err(e);
        }
        removed.push(RemovedLink {
            parent: key.id(),
            child: next,
        });

        if scope == DeleteScope::First {
            break;
        }
    }

    tracing::info!(root = %chain.root().id(), links = removed.len(), "key chain deleted");
    Ok(removed)
}
