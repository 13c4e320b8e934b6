use redis_repo::{
    ClusterHashRepository, ClusterValueInHashRepository, ClusterValueRepository, ErrorHook,
    HashRepository, RepoError, RepositoryBuilder, ValueInHashRepository, ValueRepository,
};
use redisstore::{MemoryCluster, MemoryStore};
use std::sync::{Arc, Mutex};

use super::test_entity::{Order, hash_codec, text_codec};

pub const COLLECTION: &str = "orders";

pub fn value_repo(store: &MemoryStore) -> ValueRepository<Order> {
    RepositoryBuilder::new(COLLECTION)
        .value(text_codec())
        .build(store.clone())
        .unwrap()
}

pub fn hash_repo(store: &MemoryStore) -> HashRepository<Order> {
    RepositoryBuilder::new(COLLECTION)
        .hash(hash_codec())
        .build(store.clone())
        .unwrap()
}

pub fn value_in_hash_repo(store: &MemoryStore) -> ValueInHashRepository<Order> {
    RepositoryBuilder::new(COLLECTION)
        .value_in_hash(text_codec())
        .build(store.clone())
        .unwrap()
}

pub fn cluster() -> MemoryCluster {
    MemoryCluster::new(&["node1", "node2", "node3"]).unwrap()
}

pub fn cluster_value_repo(cluster: &MemoryCluster) -> ClusterValueRepository<Order> {
    RepositoryBuilder::new(COLLECTION)
        .value(text_codec())
        .build_cluster(cluster.clone())
        .unwrap()
}

pub fn cluster_hash_repo(cluster: &MemoryCluster) -> ClusterHashRepository<Order> {
    RepositoryBuilder::new(COLLECTION)
        .hash(hash_codec())
        .build_cluster(cluster.clone())
        .unwrap()
}

pub fn cluster_value_in_hash_repo(cluster: &MemoryCluster) -> ClusterValueInHashRepository<Order> {
    RepositoryBuilder::new(COLLECTION)
        .value_in_hash(text_codec())
        .build_cluster(cluster.clone())
        .unwrap()
}

/// 记录钩子收到的错误（只保存 Display 文本）
#[derive(Clone, Default)]
pub struct HookRecorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl HookRecorder {
    pub fn hook(&self) -> impl Fn(&RepoError) + Send + Sync + 'static {
        let seen = self.seen.clone();
        move |e: &RepoError| seen.lock().unwrap().push(e.to_string())
    }

    pub fn shared(&self) -> ErrorHook {
        Arc::new(self.hook())
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}
