mod common;

use common::test_entity::{
    Order, binary_codec, binary_hash_codec, hash_codec, init_tracing, text_codec,
};
use common::test_repos::{HookRecorder, cluster};
use redis_repo::{
    AnyRepository, Codecs, RepoError, Repository, RepositoryConfig, Strategy, Ttl,
};
use redisstore::{MemoryStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

fn codecs() -> Codecs<Order> {
    Codecs::new()
        .text(text_codec())
        .binary(binary_codec())
        .text_hash(hash_codec())
        .binary_hash(binary_hash_codec())
}

fn open(json: &str, store: &MemoryStore) -> AnyRepository<Order> {
    let config = RepositoryConfig::from_json(json).unwrap();
    AnyRepository::open(&config, &codecs(), Arc::new(store.clone()), None).unwrap()
}

/// 每种布局上都成立的行为
fn exercise(repo: &AnyRepository<Order>) {
    repo.set("a", &Order::new(1)).unwrap();
    repo.set("b", &Order::new(2)).unwrap();
    assert_eq!(repo.get("a").unwrap(), Some(Order::new(1)));
    assert_eq!(repo.update("a", Order::incremented).unwrap(), Some(true));
    assert_eq!(repo.get_many(&["a", "b", "c"]).unwrap().len(), 2);
    assert!(repo.set_if_absent("c", &Order::new(3)).unwrap());
    assert_eq!(repo.delete_if("c", |o| o.total == 3).unwrap(), Some(true));
    assert_eq!(repo.delete_many(&["a", "b"]).unwrap(), 2);
    assert!(!repo.exists("a").unwrap());
}

#[test]
fn test_each_strategy_from_config() {
    init_tracing();
    for (strategy, mode) in [
        ("value", "text"),
        ("value", "binary"),
        ("hash", "text"),
        ("hash", "binary"),
        ("value_in_hash", "text"),
        ("value_in_hash", "binary"),
    ] {
        let store = MemoryStore::new();
        let json = format!(
            r#"{{"collection_key": "orders", "strategy": "{}", "mode": "{}"}}"#,
            strategy, mode
        );
        let repo = open(&json, &store);
        assert!(!repo.is_cluster());
        assert_eq!(repo.collection_key(), "orders");
        exercise(&repo);

        repo.set("z", &Order::new(9)).unwrap();
        assert_eq!(repo.get_all_ids().unwrap(), vec!["z"]);
        repo.delete_all().unwrap();
        assert_eq!(store.dbsize(), 0);
    }
}

#[test]
fn test_strategy_reported() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = open(r#"{"collection_key": "orders"}"#, &store);
    assert_eq!(repo.strategy(), Strategy::Value);
    assert!(repo.supports_cas());

    let repo = open(r#"{"collection_key": "orders", "strategy": "hash"}"#, &store);
    assert_eq!(repo.strategy(), Strategy::Hash);
    assert!(!repo.supports_cas());
}

#[test]
fn test_cas_unsupported_for_hash_layout() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = open(r#"{"collection_key": "orders", "strategy": "hash"}"#, &store);
    repo.set("a", &Order::new(1)).unwrap();

    assert!(matches!(
        repo.update_if_it_is("a", &Order::new(1), &Order::new(2)),
        Err(RepoError::Unsupported(_))
    ));
    assert!(matches!(
        repo.delete_if_it_is_not("a", &Order::new(5)),
        Err(RepoError::Unsupported(_))
    ));
    assert_eq!(repo.get("a").unwrap(), Some(Order::new(1)));

    let repo = open(r#"{"collection_key": "orders", "strategy": "value"}"#, &store);
    repo.set("b", &Order::new(1)).unwrap();
    assert!(repo
        .update_if_it_is("b", &Order::new(1), &Order::new(2))
        .unwrap());
    assert!(repo.delete_if_it_is("b", &Order::new(2)).unwrap());
}

#[test]
fn test_entity_ttl_unsupported_for_shared_hash() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = open(
        r#"{"collection_key": "orders", "strategy": "value_in_hash"}"#,
        &store,
    );
    assert!(matches!(
        repo.set_with_ttl("a", &Order::new(1), Duration::from_secs(1)),
        Err(RepoError::Unsupported(_))
    ));
    assert!(matches!(repo.ttl("a"), Err(RepoError::Unsupported(_))));
    assert_eq!(store.dbsize(), 0);

    let repo = open(r#"{"collection_key": "orders", "strategy": "hash"}"#, &store);
    repo.set_with_ttl("a", &Order::new(1), Duration::from_secs(1))
        .unwrap();
    assert!(matches!(repo.ttl("a").unwrap(), Some(Ttl::Expiring(_))));
    assert!(repo.persist("a").unwrap());
    assert!(repo.expire("a", Duration::from_secs(2)).unwrap());
}

#[test]
fn test_cluster_facade() {
    init_tracing();
    let cluster = cluster();
    let recorder = HookRecorder::default();
    let config = RepositoryConfig::from_json(r#"{"collection_key": "orders", "max_attempts": 3}"#)
        .unwrap();
    let repo = AnyRepository::open_cluster(
        &config,
        &codecs(),
        Arc::new(cluster.clone()),
        Some(recorder.shared()),
    )
    .unwrap();
    assert!(repo.is_cluster());

    exercise(&repo);
    assert!(matches!(repo.get_all(), Err(RepoError::Unsupported(_))));

    let store = cluster.store_for_key(b"orders:x");
    store.inject_fault(StoreError::Connection("boom".to_string()));
    assert!(matches!(repo.get("x"), Err(RepoError::Store(_))));
    assert_eq!(recorder.seen().len(), 1);
}

#[test]
fn test_hook_shared_with_node_facade() {
    init_tracing();
    let store = MemoryStore::new();
    let recorder = HookRecorder::default();
    let config = RepositoryConfig::new("orders");
    let repo = AnyRepository::open(
        &config,
        &codecs(),
        Arc::new(store.clone()),
        Some(recorder.shared()),
    )
    .unwrap();

    store.inject_fault(StoreError::Connection("boom".to_string()));
    assert!(repo.set("a", &Order::new(1)).is_err());
    assert!(matches!(repo.get(""), Err(RepoError::InvalidArgument(_))));
    assert_eq!(recorder.seen().len(), 1);
}

#[test]
fn test_invalid_config_rejected() {
    init_tracing();
    let store = MemoryStore::new();
    let mut config = RepositoryConfig::new("orders");
    config.separator = String::new();
    assert!(matches!(
        AnyRepository::open(&config, &codecs(), Arc::new(store), None),
        Err(RepoError::InvalidKey(_))
    ));
}
