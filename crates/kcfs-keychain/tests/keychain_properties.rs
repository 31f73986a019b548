//! End-to-end key chain behaviour through the `Keychain` facade, using
//! passphrase-derived keys as the CLI does.

use std::collections::HashSet;
use std::path::PathBuf;

use kcfs_core::{ChainMode, KeychainError};
use kcfs_crypto::{derive_key, KdfParams, Key, KeyParams, LINK_RECORD_SIZE};
use kcfs_keychain::{
    install_chain, ChainStore, ChainTarget, DeleteScope, Keychain, Keyring, LockMode, MemoryKeyring,
};
use secrecy::SecretString;
use tempfile::TempDir;

fn fast_params() -> KeyParams {
    KeyParams {
        algorithm: "aes256-xts".into(),
        iterations: 1,
        keyfile: None,
        no_passphrase: false,
        kdf: KdfParams {
            mem_cost_kib: 1024,
            parallelism: 1,
        },
    }
}

fn passphrase_key(passphrase: &str) -> Key {
    derive_key(Some(&SecretString::from(passphrase)), &fast_params()).unwrap()
}

/// `[A, B, C]` linked through the facade.
fn three_key_chain(keychain: &Keychain) -> (Key, Key, Key) {
    let (a, b, c) = (
        passphrase_key("alpha"),
        passphrase_key("bravo"),
        passphrase_key("charlie"),
    );
    keychain.set(&a, &ChainTarget::Key(b.clone())).unwrap();
    keychain.set(&b, &ChainTarget::Key(c.clone())).unwrap();
    (a, b, c)
}

#[test]
fn add_then_resolve() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (k, c) = (passphrase_key("parent"), passphrase_key("child"));

    keychain.set(&k, &ChainTarget::Key(c.clone())).unwrap();

    let chain = keychain.get(&k, ChainMode::Use).unwrap();
    assert_eq!(chain.ids(), vec![k.id(), c.id()]);
    assert_eq!(chain.keys()[1].secret(), c.secret());
    assert_eq!(chain.keys()[1].algorithm(), c.algorithm());
}

#[test]
fn double_add_conflicts_and_leaves_store_unchanged() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (k, c, c2) = (
        passphrase_key("parent"),
        passphrase_key("child"),
        passphrase_key("other"),
    );

    keychain.set(&k, &ChainTarget::Key(c.clone())).unwrap();
    let before = std::fs::read(keychain.store_path()).unwrap();

    let result = keychain.set(&k, &ChainTarget::Key(c2));
    match result {
        Err(KeychainError::ChainExists { parent, child }) => {
            assert_eq!(parent, k.id());
            assert_eq!(child, c.id());
        }
        other => panic!("expected ChainExists, got: {other:?}"),
    }

    assert_eq!(std::fs::read(keychain.store_path()).unwrap(), before);
    assert_eq!(keychain.get(&k, ChainMode::Use).unwrap().ids(), vec![k.id(), c.id()]);
}

#[test]
fn sealed_parent_cannot_be_extended() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (k, c) = (passphrase_key("parent"), passphrase_key("child"));

    keychain.set(&k, &ChainTarget::Seal).unwrap();
    let before = std::fs::read(keychain.store_path()).unwrap();

    let result = keychain.set(&k, &ChainTarget::Key(c.clone()));
    assert!(matches!(
        result,
        Err(KeychainError::ChainExists { parent, .. }) if parent == k.id()
    ));

    assert_eq!(std::fs::read(keychain.store_path()).unwrap(), before);
    assert_eq!(keychain.get(&k, ChainMode::Use).unwrap().ids(), vec![k.id()]);
    assert_eq!(keychain.link_count().unwrap(), 1);
}

#[test]
fn default_delete_removes_only_the_first_link() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (a, b, c) = three_key_chain(&keychain);
    assert_eq!(keychain.get(&a, ChainMode::Use).unwrap().len(), 3);

    let removed = keychain.delete(&a, DeleteScope::default()).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].parent, a.id());
    assert_eq!(removed[0].child, Some(b.id()));

    assert_eq!(keychain.get(&a, ChainMode::IgnoreMissing).unwrap().ids(), vec![a.id()]);
    assert_eq!(keychain.get(&b, ChainMode::Use).unwrap().ids(), vec![b.id(), c.id()]);
}

#[test]
fn full_delete_removes_every_link() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (a, b, c) = three_key_chain(&keychain);

    let removed = keychain.delete(&a, DeleteScope::Full).unwrap();
    assert_eq!(removed.len(), 3);
    assert_eq!(removed[2].child, None);

    for key in [&a, &b, &c] {
        let chain = keychain.get(key, ChainMode::IgnoreMissing).unwrap();
        assert_eq!(chain.ids(), vec![key.id()]);
    }
    assert_eq!(keychain.link_count().unwrap(), 0);
}

#[test]
fn delete_without_chain_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let k = passphrase_key("lonely");

    assert!(matches!(
        keychain.delete(&k, DeleteScope::First),
        Err(KeychainError::NotFound { id }) if id == k.id()
    ));
}

#[test]
fn chaff_is_disjoint_and_harmless() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (a, b, c) = three_key_chain(&keychain);
    let before = keychain.link_count().unwrap();

    let decoys = keychain.inject_chaff(10).unwrap();
    assert_eq!(decoys.len(), 10);
    assert_eq!(keychain.link_count().unwrap(), before + 10);

    let real: HashSet<_> = [a.id(), b.id(), c.id()].into_iter().collect();
    for (parent, child) in &decoys {
        assert!(!real.contains(parent));
        assert!(!real.contains(child));
    }

    assert_eq!(
        keychain.get(&a, ChainMode::Use).unwrap().ids(),
        vec![a.id(), b.id(), c.id()]
    );
}

#[test]
fn every_record_has_the_same_size() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (a, _, c) = three_key_chain(&keychain);
    keychain.set(&c, &ChainTarget::Seal).unwrap();
    keychain.inject_chaff(4).unwrap();

    let store = ChainStore::open(tmp.path(), LockMode::Shared).unwrap();
    assert_eq!(store.len(), 7);
    for parent in store.parents() {
        assert_eq!(store.lookup(parent).unwrap().record().len(), LINK_RECORD_SIZE);
    }
    drop(store);

    // The seal ends the chain at C.
    assert_eq!(keychain.get(&a, ChainMode::Use).unwrap().len(), 3);
}

#[test]
fn cycle_is_reported_as_corruption() {
    let tmp = TempDir::new().unwrap();
    let (a, b) = (passphrase_key("loop-a"), passphrase_key("loop-b"));
    {
        let mut store = ChainStore::open(tmp.path(), LockMode::Exclusive).unwrap();
        kcfs_keychain::mutate::insert_link(&mut store, &a, &b).unwrap();
        kcfs_keychain::mutate::insert_link(&mut store, &b, &a).unwrap();
    }

    let keychain = Keychain::new(tmp.path());
    assert!(matches!(
        keychain.get(&a, ChainMode::Use),
        Err(KeychainError::Corrupted(_))
    ));
}

#[test]
fn non_positive_iterations_rejected_before_any_work() {
    let params = KeyParams {
        iterations: 0,
        // A keyfile that does not exist: reading it would be a different error.
        keyfile: Some(PathBuf::from("/nonexistent/kcfs/keyfile")),
        ..fast_params()
    };

    for iterations in [0, -1, i64::MIN] {
        let params = KeyParams {
            iterations,
            ..params.clone()
        };
        match derive_key(Some(&SecretString::from("pw")), &params) {
            Err(KeychainError::Usage(msg)) => assert!(msg.contains("iterations"), "{msg}"),
            other => panic!("expected usage error, got: {other:?}"),
        }
    }
}

#[test]
fn resolved_chain_installs_root_first() {
    let tmp = TempDir::new().unwrap();
    let keychain = Keychain::new(tmp.path());
    let (a, _, _) = three_key_chain(&keychain);

    let chain = keychain.get(&a, ChainMode::Use).unwrap();
    let mut keyring = MemoryKeyring::new();
    assert_eq!(install_chain(&mut keyring, &chain).unwrap(), 3);

    let installed: Vec<_> = keyring.keys().unwrap().iter().map(Key::id).collect();
    assert_eq!(installed, chain.ids());
}

#[test]
fn store_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let (a, b, _) = three_key_chain(&Keychain::new(tmp.path()));

    let keychain = Keychain::new(tmp.path());
    let chain = keychain.get(&a, ChainMode::Use).unwrap();
    assert_eq!(chain.keys()[1].id(), b.id());
}
