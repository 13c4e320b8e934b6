mod common;

use common::test_entity::{Order, init_tracing};
use common::test_repos::{hash_repo, value_in_hash_repo, value_repo};
use redis_repo::Repository;
use redisstore::MemoryStore;
use std::sync::Barrier;
use std::thread;

/// 更新过程中另一个写入先提交：外层事务放弃，只有内层生效
fn assert_interleaved_update_aborts<R: Repository<Order>>(repo: &R) {
    repo.set("x", &Order::new(10)).unwrap();

    let mut inner = None;
    let outer = repo
        .update("x", |o| {
            inner = Some(repo.update("x", |o| o.with_total(20)).unwrap());
            o.with_total(o.total + 1)
        })
        .unwrap();

    assert_eq!(inner, Some(Some(true)));
    assert_eq!(outer, Some(false));
    assert_eq!(repo.get("x").unwrap(), Some(Order::new(20)));
}

#[test]
fn test_interleaved_update_value_layout() {
    init_tracing();
    let store = MemoryStore::new();
    assert_interleaved_update_aborts(&value_repo(&store));
    assert_eq!(store.open_connections(), 0);
}

#[test]
fn test_interleaved_update_hash_layout() {
    init_tracing();
    let store = MemoryStore::new();
    assert_interleaved_update_aborts(&hash_repo(&store));
    assert_eq!(store.open_connections(), 0);
}

#[test]
fn test_interleaved_update_value_in_hash_layout() {
    init_tracing();
    let store = MemoryStore::new();
    assert_interleaved_update_aborts(&value_in_hash_repo(&store));
    assert_eq!(store.open_connections(), 0);
}

#[test]
fn test_interleaved_delete_if_aborts() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set("x", &Order::new(10)).unwrap();

    let outcome = repo
        .delete_if("x", |o| {
            repo.set("x", &Order::new(11)).unwrap();
            o.total == 10
        })
        .unwrap();
    assert_eq!(outcome, Some(false));
    assert_eq!(repo.get("x").unwrap(), Some(Order::new(11)));
}

#[test]
fn test_concurrent_updates_one_wins() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set("x", &Order::new(10)).unwrap();

    // 两个线程都读到 10 之后才各自提交
    let barrier = Barrier::new(2);
    let outcomes: Vec<Option<bool>> = thread::scope(|s| {
        let handles: Vec<_> = [20, 30]
            .into_iter()
            .map(|total| {
                let (repo, barrier) = (&repo, &barrier);
                s.spawn(move || {
                    repo.update("x", |o| {
                        barrier.wait();
                        o.with_total(total)
                    })
                    .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(
        outcomes.iter().filter(|o| **o == Some(true)).count(),
        1,
        "outcomes: {:?}",
        outcomes
    );
    assert_eq!(outcomes.iter().filter(|o| **o == Some(false)).count(), 1);
    let total = repo.get("x").unwrap().unwrap().total;
    assert!(total == 20 || total == 30);
    assert_eq!(store.open_connections(), 0);
}

#[test]
fn test_retry_until_committed() {
    init_tracing();
    let store = MemoryStore::new();
    let repo = value_repo(&store);
    repo.set("counter", &Order::new(0)).unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    while repo.update("counter", Order::incremented).unwrap() != Some(true) {}
                }
            });
        }
    });
    assert_eq!(repo.get("counter").unwrap(), Some(Order::new(100)));
}
