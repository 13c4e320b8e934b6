//! 仓储构造
//!
//! ```rust
//! use redis_repo::{JsonCodec, Repository, RepositoryBuilder};
//! use redisstore::MemoryStore;
//!
//! let repo = RepositoryBuilder::new("orders")
//!     .value(JsonCodec::<u32>::new())
//!     .build(MemoryStore::new())
//!     .unwrap();
//! repo.set("42", &10).unwrap();
//! assert_eq!(repo.get("42").unwrap(), Some(10));
//! ```

use redisstore::{ClusterConnectionHandler, ConnectionProvider};
use std::sync::Arc;

use crate::cluster::{ClusterDispatcher, DEFAULT_MAX_ATTEMPTS};
use crate::codec::{HashCodec, ValueCodec};
use crate::dispatch::NodeDispatcher;
use crate::error::{ErrorHook, RepoError, RepoResult};
use crate::key::{DEFAULT_SEPARATOR, KeySpace};
use crate::repository::{
    ClusterHashRepository, ClusterValueInHashRepository, ClusterValueRepository, HashRepository,
    ValueInHashRepository, ValueRepository,
};

/// 各布局共用的参数
#[derive(Clone)]
pub struct RepositoryBuilder {
    collection: String,
    separator: String,
    hook: Option<ErrorHook>,
    max_attempts: u32,
}

impl RepositoryBuilder {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            separator: DEFAULT_SEPARATOR.to_string(),
            hook: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// 存储错误在返回给调用方之前先交给 `hook`
    pub fn error_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RepoError) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub(crate) fn shared_hook(mut self, hook: Option<ErrorHook>) -> Self {
        self.hook = hook;
        self
    }

    /// 集群模式下单次操作的最大尝试次数（含第一次）
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// 值布局
    pub fn value<T, C>(self, codec: C) -> StrategyBuilder<ValueLayout<T>>
    where
        C: ValueCodec<T> + 'static,
    {
        self.value_with(Arc::new(codec))
    }

    pub fn value_with<T>(self, codec: Arc<dyn ValueCodec<T>>) -> StrategyBuilder<ValueLayout<T>> {
        StrategyBuilder {
            common: self,
            layout: ValueLayout(codec),
        }
    }

    /// hash 布局
    pub fn hash<T, C>(self, codec: C) -> StrategyBuilder<HashLayout<T>>
    where
        C: HashCodec<T> + 'static,
    {
        self.hash_with(Arc::new(codec))
    }

    pub fn hash_with<T>(self, codec: Arc<dyn HashCodec<T>>) -> StrategyBuilder<HashLayout<T>> {
        StrategyBuilder {
            common: self,
            layout: HashLayout(codec),
        }
    }

    /// 共享 hash 布局
    pub fn value_in_hash<T, C>(self, codec: C) -> StrategyBuilder<ValueInHashLayout<T>>
    where
        C: ValueCodec<T> + 'static,
    {
        self.value_in_hash_with(Arc::new(codec))
    }

    pub fn value_in_hash_with<T>(
        self,
        codec: Arc<dyn ValueCodec<T>>,
    ) -> StrategyBuilder<ValueInHashLayout<T>> {
        StrategyBuilder {
            common: self,
            layout: ValueInHashLayout(codec),
        }
    }

    fn key_space(&self) -> RepoResult<KeySpace> {
        KeySpace::new(self.collection.clone(), self.separator.clone())
    }

    fn node(&self, provider: Arc<dyn ConnectionProvider>) -> RepoResult<(KeySpace, NodeDispatcher)> {
        Ok((
            self.key_space()?,
            NodeDispatcher::new(provider, self.hook.clone()),
        ))
    }

    fn cluster(
        &self,
        handler: Arc<dyn ClusterConnectionHandler>,
    ) -> RepoResult<(KeySpace, ClusterDispatcher)> {
        let keys = self.key_space()?;
        let dispatcher = ClusterDispatcher::new(handler, self.max_attempts, self.hook.clone())?;
        Ok((keys, dispatcher))
    }
}

pub struct ValueLayout<T>(Arc<dyn ValueCodec<T>>);
pub struct HashLayout<T>(Arc<dyn HashCodec<T>>);
pub struct ValueInHashLayout<T>(Arc<dyn ValueCodec<T>>);

/// 选定布局之后的构造器
pub struct StrategyBuilder<L> {
    common: RepositoryBuilder,
    layout: L,
}

impl<T> StrategyBuilder<ValueLayout<T>> {
    pub fn build<P>(self, provider: P) -> RepoResult<ValueRepository<T>>
    where
        P: ConnectionProvider + 'static,
    {
        self.build_shared(Arc::new(provider))
    }

    pub fn build_shared(self, provider: Arc<dyn ConnectionProvider>) -> RepoResult<ValueRepository<T>> {
        let (keys, dispatcher) = self.common.node(provider)?;
        Ok(ValueRepository::new(keys, self.layout.0, dispatcher))
    }

    pub fn build_cluster<H>(self, handler: H) -> RepoResult<ClusterValueRepository<T>>
    where
        H: ClusterConnectionHandler + 'static,
    {
        self.build_cluster_shared(Arc::new(handler))
    }

    pub fn build_cluster_shared(
        self,
        handler: Arc<dyn ClusterConnectionHandler>,
    ) -> RepoResult<ClusterValueRepository<T>> {
        let (keys, dispatcher) = self.common.cluster(handler)?;
        Ok(ValueRepository::new(keys, self.layout.0, dispatcher))
    }
}

impl<T> StrategyBuilder<HashLayout<T>> {
    pub fn build<P>(self, provider: P) -> RepoResult<HashRepository<T>>
    where
        P: ConnectionProvider + 'static,
    {
        self.build_shared(Arc::new(provider))
    }

    pub fn build_shared(self, provider: Arc<dyn ConnectionProvider>) -> RepoResult<HashRepository<T>> {
        let (keys, dispatcher) = self.common.node(provider)?;
        Ok(HashRepository::new(keys, self.layout.0, dispatcher))
    }

    pub fn build_cluster<H>(self, handler: H) -> RepoResult<ClusterHashRepository<T>>
    where
        H: ClusterConnectionHandler + 'static,
    {
        self.build_cluster_shared(Arc::new(handler))
    }

    pub fn build_cluster_shared(
        self,
        handler: Arc<dyn ClusterConnectionHandler>,
    ) -> RepoResult<ClusterHashRepository<T>> {
        let (keys, dispatcher) = self.common.cluster(handler)?;
        Ok(HashRepository::new(keys, self.layout.0, dispatcher))
    }
}

impl<T> StrategyBuilder<ValueInHashLayout<T>> {
    pub fn build<P>(self, provider: P) -> RepoResult<ValueInHashRepository<T>>
    where
        P: ConnectionProvider + 'static,
    {
        self.build_shared(Arc::new(provider))
    }

    pub fn build_shared(
        self,
        provider: Arc<dyn ConnectionProvider>,
    ) -> RepoResult<ValueInHashRepository<T>> {
        let (keys, dispatcher) = self.common.node(provider)?;
        Ok(ValueInHashRepository::new(keys, self.layout.0, dispatcher))
    }

    pub fn build_cluster<H>(self, handler: H) -> RepoResult<ClusterValueInHashRepository<T>>
    where
        H: ClusterConnectionHandler + 'static,
    {
        self.build_cluster_shared(Arc::new(handler))
    }

    pub fn build_cluster_shared(
        self,
        handler: Arc<dyn ClusterConnectionHandler>,
    ) -> RepoResult<ClusterValueInHashRepository<T>> {
        let (keys, dispatcher) = self.common.cluster(handler)?;
        Ok(ValueInHashRepository::new(keys, self.layout.0, dispatcher))
    }
}
