mod common;

use common::test_entity::{Order, binary_codec, init_tracing, json_codec, text_codec};
use common::test_repos::{COLLECTION, HookRecorder, value_repo};
use rand::Rng;
use redis_repo::{
    CasRepository, ExpiringRepository, RepoError, Repository, RepositoryBuilder, Ttl,
    ValueRepository,
};
use redisstore::{MemoryStore, RedisConnection, RedisValue, StoreError};
use std::time::Duration;

fn raw_string(store: &MemoryStore, key: &[u8]) -> Option<Vec<u8>> {
    match store.raw(key) {
        Some(RedisValue::String(v)) => Some(v),
        _ => None,
    }
}

#[test]
fn test_set_get_round_trip() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);

    repo.set("42", &Order::new(10)).unwrap();
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(10)));
    assert_eq!(
        raw_string(&store, b"orders:42"),
        Some(br#"{"total":10}"#.to_vec())
    );
    assert!(repo.exists("42").unwrap());
    assert!(!repo.exists("43").unwrap());
    assert_eq!(repo.get("43").unwrap(), None);
    assert_eq!(store.open_connections(), 0);
}

#[test]
fn test_random_round_trips_both_modes() {
    init_tracing();
    let store = MemoryStore::new();
    let text = value_repo(&store);
    let binary: ValueRepository<Order> = RepositoryBuilder::new("binary_orders")
        .value(binary_codec())
        .build(store.clone())
        .unwrap();

    let mut rng = rand::rng();
    for i in 0..50 {
        let order = Order::new(rng.random_range(0..u32::MAX));
        let id = format!("id-{}", i);
        text.set(&id, &order).unwrap();
        binary.set(&id, &order).unwrap();
        assert_eq!(text.get(&id).unwrap(), Some(order.clone()));
        assert_eq!(binary.get(&id).unwrap(), Some(order));
    }
    assert_eq!(text.get_all_ids().unwrap().len(), 50);
    assert_eq!(binary.get_all_ids().unwrap().len(), 50);
}

#[test]
fn test_update() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);

    assert_eq!(repo.update("42", Order::incremented).unwrap(), None);
    assert!(!repo.exists("42").unwrap());

    repo.set("42", &Order::new(10)).unwrap();
    assert_eq!(repo.update("42", Order::incremented).unwrap(), Some(true));
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(11)));
}

#[test]
fn test_update_if_condition_false_leaves_value() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set("42", &Order::new(10)).unwrap();

    let mut called = false;
    let outcome = repo
        .update_if(
            "42",
            |o| {
                called = true;
                o.with_total(99)
            },
            |o| o.total > 100,
        )
        .unwrap();
    assert_eq!(outcome, Some(true));
    assert!(!called);
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(10)));

    let outcome = repo
        .update_if("42", |o| o.with_total(99), |o| o.total == 10)
        .unwrap();
    assert_eq!(outcome, Some(true));
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(99)));
}

#[test]
fn test_delete_if() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);

    assert_eq!(repo.delete_if("42", |_| true).unwrap(), None);

    repo.set("42", &Order::new(10)).unwrap();
    assert_eq!(repo.delete_if("42", |o| o.total != 10).unwrap(), Some(true));
    assert!(repo.exists("42").unwrap());
    assert_eq!(repo.delete_if("42", |o| o.total == 10).unwrap(), Some(true));
    assert!(!repo.exists("42").unwrap());
}

#[test]
fn test_cas_update_and_delete() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set("42", &Order::new(10)).unwrap();

    assert!(repo
        .update_if_it_is("42", &Order::new(10), &Order::new(20))
        .unwrap());
    assert!(!repo
        .update_if_it_is("42", &Order::new(10), &Order::new(30))
        .unwrap());
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(20)));

    assert!(!repo
        .update_if_it_is_not("42", &Order::new(20), &Order::new(30))
        .unwrap());
    assert!(repo
        .update_if_it_is_not("42", &Order::new(10), &Order::new(30))
        .unwrap());
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(30)));

    assert!(!repo.delete_if_it_is("42", &Order::new(10)).unwrap());
    assert!(!repo.delete_if_it_is_not("42", &Order::new(30)).unwrap());
    assert!(repo.delete_if_it_is("42", &Order::new(30)).unwrap());
    assert!(!repo.exists("42").unwrap());

    // 不存在的实体：所有 CAS 都不生效
    assert!(!repo
        .update_if_it_is("42", &Order::new(30), &Order::new(1))
        .unwrap());
    assert!(!repo
        .update_if_it_is_not("42", &Order::new(30), &Order::new(1))
        .unwrap());
    assert!(!repo.delete_if_it_is_not("42", &Order::new(30)).unwrap());
    assert!(!repo.exists("42").unwrap());
}

#[test]
fn test_cas_reloads_flushed_script() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set("42", &Order::new(10)).unwrap();

    assert!(repo
        .update_if_it_is("42", &Order::new(10), &Order::new(11))
        .unwrap());
    assert_eq!(store.script_count(), 1);

    store.script_flush();
    assert_eq!(store.script_count(), 0);
    assert!(repo
        .update_if_it_is("42", &Order::new(11), &Order::new(12))
        .unwrap());
    assert_eq!(store.script_count(), 1);
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(12)));
}

#[test]
fn test_conditional_set() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);

    assert!(!repo.set_if_exists("42", &Order::new(1)).unwrap());
    assert!(!repo.exists("42").unwrap());
    assert!(repo.set_if_absent("42", &Order::new(1)).unwrap());
    assert!(!repo.set_if_absent("42", &Order::new(2)).unwrap());
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(1)));
    assert!(repo.set_if_exists("42", &Order::new(3)).unwrap());
    assert_eq!(repo.get("42").unwrap(), Some(Order::new(3)));
}

#[test]
fn test_multi_key_operations() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    for (id, total) in [("a", 1), ("b", 2), ("c", 3)] {
        repo.set(id, &Order::new(total)).unwrap();
    }

    let found = repo.get_many(&["a", "c", "missing"]).unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found["a"], Order::new(1));
    assert_eq!(found["c"], Order::new(3));
    assert!(repo.get_many(&[]).unwrap().is_empty());

    let all = repo.get_all().unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(repo.get_all_ids().unwrap(), vec!["a", "b", "c"]);

    assert_eq!(repo.delete_many(&["a", "missing"]).unwrap(), 1);
    assert_eq!(repo.delete_many(&[]).unwrap(), 0);
    assert_eq!(repo.get_all_ids().unwrap(), vec!["b", "c"]);

    assert!(repo.delete("b").unwrap());
    assert!(!repo.delete("b").unwrap());
}

#[test]
fn test_delete_all_scoped_to_collection() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    let other: ValueRepository<Order> = RepositoryBuilder::new("ordersx")
        .value(json_codec())
        .build(store.clone())
        .unwrap();

    repo.set("1", &Order::new(1)).unwrap();
    repo.set("2", &Order::new(2)).unwrap();
    other.set("1", &Order::new(9)).unwrap();

    repo.delete_all().unwrap();
    assert!(repo.get_all().unwrap().is_empty());
    assert_eq!(other.get("1").unwrap(), Some(Order::new(9)));

    // 空集合上也不出错
    repo.delete_all().unwrap();
}

#[test]
fn test_ids_with_glob_characters() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set("a*b", &Order::new(1)).unwrap();
    repo.set("a[1]", &Order::new(2)).unwrap();
    repo.set("with:separator", &Order::new(3)).unwrap();

    assert_eq!(
        repo.get_all_ids().unwrap(),
        vec!["a*b", "a[1]", "with:separator"]
    );
    assert_eq!(repo.get("with:separator").unwrap(), Some(Order::new(3)));
}

#[test]
fn test_ttl() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);

    assert_eq!(repo.ttl("42").unwrap(), None);
    repo.set_with_ttl("42", &Order::new(1), Duration::from_secs(60))
        .unwrap();
    match repo.ttl("42").unwrap() {
        Some(Ttl::Expiring(left)) => assert!(left <= Duration::from_secs(60)),
        other => panic!("unexpected ttl: {:?}", other),
    }

    assert!(repo.persist("42").unwrap());
    assert_eq!(repo.ttl("42").unwrap(), Some(Ttl::Persistent));
    assert!(!repo.persist("42").unwrap());

    assert!(repo.expire("42", Duration::from_secs(30)).unwrap());
    assert!(!repo.expire("missing", Duration::from_secs(30)).unwrap());

    // 普通 SET 清除 TTL
    repo.set("42", &Order::new(2)).unwrap();
    assert_eq!(repo.ttl("42").unwrap(), Some(Ttl::Persistent));
}

#[test]
fn test_short_ttl_expires() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set_with_ttl("42", &Order::new(1), Duration::from_millis(20))
        .unwrap();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(repo.get("42").unwrap(), None);
    assert!(!repo.exists("42").unwrap());
}

#[test]
fn test_invalid_arguments_fail_before_io() {
    init_tracing();
    let store = MemoryStore::new();
    let recorder = HookRecorder::default();
    let repo: ValueRepository<Order> = RepositoryBuilder::new(COLLECTION)
        .error_hook(recorder.hook())
        .value(text_codec())
        .build(store.clone())
        .unwrap();

    // 有故障排队，但参数校验在取连接之前
    store.inject_fault(StoreError::Connection("down".to_string()));

    assert!(matches!(repo.get(""), Err(RepoError::InvalidArgument(_))));
    assert!(matches!(
        repo.set("  ", &Order::new(1)),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(matches!(
        repo.get_many(&["a", ""]),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(matches!(
        repo.set_with_ttl("a", &Order::new(1), Duration::ZERO),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(matches!(
        repo.update_if_it_is("", &Order::new(1), &Order::new(2)),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(recorder.seen().is_empty());

    // 故障仍在，由下一次真正的访问消费
    assert!(matches!(repo.get("a"), Err(RepoError::Store(StoreError::Connection(_)))));
    assert_eq!(recorder.seen().len(), 1);
}

#[test]
fn test_store_error_reaches_hook_and_caller() {
    init_tracing();
    let store = MemoryStore::new();
    let recorder = HookRecorder::default();
    let repo: ValueRepository<Order> = RepositoryBuilder::new(COLLECTION)
        .error_hook(recorder.hook())
        .value(text_codec())
        .build(store.clone())
        .unwrap();
    repo.set("42", &Order::new(1)).unwrap();

    store.inject_fault(StoreError::Connection("connection reset".to_string()));
    let err = repo.update("42", Order::incremented).unwrap_err();
    assert!(matches!(err, RepoError::Store(StoreError::Connection(_))));

    let seen = recorder.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("connection reset"));
    assert_eq!(store.open_connections(), 0);

    // 之后照常工作
    assert_eq!(repo.update("42", Order::incremented).unwrap(), Some(true));
}

#[test]
fn test_decode_error_is_not_store_error() {
    init_tracing();
    let store = MemoryStore::new();
    let recorder = HookRecorder::default();
    let repo: ValueRepository<Order> = RepositoryBuilder::new(COLLECTION)
        .error_hook(recorder.hook())
        .value(text_codec())
        .build(store.clone())
        .unwrap();

    store.connection().set(b"orders:bad", b"not json").unwrap();
    assert!(matches!(repo.get("bad"), Err(RepoError::Serialization(_))));
    assert!(matches!(
        repo.update("bad", Order::incremented),
        Err(RepoError::Serialization(_))
    ));
    assert!(recorder.seen().is_empty());
    assert_eq!(store.open_connections(), 0);
}

#[test]
fn test_empty_value_reads_as_absent() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    store.connection().set(b"orders:empty", b"").unwrap();
    assert_eq!(repo.get("empty").unwrap(), None);
    assert_eq!(repo.update("empty", Order::incremented).unwrap(), None);
}

#[test]
fn test_wrong_type_is_store_error() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    store
        .connection()
        .hset(b"orders:h", &[(b"total".to_vec(), b"1".to_vec())])
        .unwrap();
    assert!(matches!(
        repo.get("h"),
        Err(RepoError::Store(StoreError::WrongType))
    ));
}
