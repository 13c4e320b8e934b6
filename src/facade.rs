//! 运行时选择布局的仓储
//!
//! 布局来自配置时用 [`AnyRepository`]：它实现 [`Repository`]，布局不支持的
//! CAS / TTL 操作在访问存储之前返回 [`RepoError::Unsupported`]。

use redisstore::{ClusterConnectionHandler, ConnectionProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::RepositoryBuilder;
use crate::codec::{HashCodec, SerializationMode, ValueCodec};
use crate::config::{RepositoryConfig, Strategy};
use crate::error::{ErrorHook, RepoError, RepoResult};
use crate::repository::{
    CasRepository, ClusterHashRepository, ClusterValueInHashRepository, ClusterValueRepository,
    ExpiringRepository, HashRepository, Repository, Ttl, ValueInHashRepository, ValueRepository,
};

/// 按序列化模式和布局提供的编解码器，只需要填配置会用到的那个
pub struct Codecs<T> {
    text: Option<Arc<dyn ValueCodec<T>>>,
    binary: Option<Arc<dyn ValueCodec<T>>>,
    text_hash: Option<Arc<dyn HashCodec<T>>>,
    binary_hash: Option<Arc<dyn HashCodec<T>>>,
}

impl<T> Default for Codecs<T> {
    fn default() -> Self {
        Self {
            text: None,
            binary: None,
            text_hash: None,
            binary_hash: None,
        }
    }
}

impl<T> Codecs<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, codec: impl ValueCodec<T> + 'static) -> Self {
        self.text = Some(Arc::new(codec));
        self
    }

    pub fn binary(mut self, codec: impl ValueCodec<T> + 'static) -> Self {
        self.binary = Some(Arc::new(codec));
        self
    }

    pub fn text_hash(mut self, codec: impl HashCodec<T> + 'static) -> Self {
        self.text_hash = Some(Arc::new(codec));
        self
    }

    pub fn binary_hash(mut self, codec: impl HashCodec<T> + 'static) -> Self {
        self.binary_hash = Some(Arc::new(codec));
        self
    }

    fn value(&self, mode: SerializationMode) -> RepoResult<Arc<dyn ValueCodec<T>>> {
        let codec = match mode {
            SerializationMode::Text => self.text.clone(),
            SerializationMode::Binary => self.binary.clone(),
        }
        .ok_or_else(|| RepoError::InvalidConfig(format!("no {:?} value codec configured", mode)))?;
        check_mode(codec.mode(), mode)?;
        Ok(codec)
    }

    fn hash(&self, mode: SerializationMode) -> RepoResult<Arc<dyn HashCodec<T>>> {
        let codec = match mode {
            SerializationMode::Text => self.text_hash.clone(),
            SerializationMode::Binary => self.binary_hash.clone(),
        }
        .ok_or_else(|| RepoError::InvalidConfig(format!("no {:?} hash codec configured", mode)))?;
        check_mode(codec.mode(), mode)?;
        Ok(codec)
    }
}

fn check_mode(actual: SerializationMode, wanted: SerializationMode) -> RepoResult<()> {
    if actual != wanted {
        return Err(RepoError::InvalidConfig(format!(
            "codec registered for {:?} mode works in {:?} mode",
            wanted, actual
        )));
    }
    Ok(())
}

/// 任意布局、任意部署模式的仓储
pub enum AnyRepository<T> {
    Value(ValueRepository<T>),
    Hash(HashRepository<T>),
    ValueInHash(ValueInHashRepository<T>),
    ClusterValue(ClusterValueRepository<T>),
    ClusterHash(ClusterHashRepository<T>),
    ClusterValueInHash(ClusterValueInHashRepository<T>),
}

/// 对每个变体执行同一段代码
macro_rules! each {
    ($self:expr, $repo:ident => $body:expr) => {
        match $self {
            AnyRepository::Value($repo) => $body,
            AnyRepository::Hash($repo) => $body,
            AnyRepository::ValueInHash($repo) => $body,
            AnyRepository::ClusterValue($repo) => $body,
            AnyRepository::ClusterHash($repo) => $body,
            AnyRepository::ClusterValueInHash($repo) => $body,
        }
    };
}

/// 只对支持 CAS 的变体执行，其余返回 Unsupported
macro_rules! with_cas {
    ($self:expr, $op:literal, $repo:ident => $body:expr) => {
        match $self {
            AnyRepository::Value($repo) => $body,
            AnyRepository::ValueInHash($repo) => $body,
            AnyRepository::ClusterValue($repo) => $body,
            AnyRepository::ClusterValueInHash($repo) => $body,
            AnyRepository::Hash(_) | AnyRepository::ClusterHash(_) => Err(RepoError::Unsupported(
                format!("{} is not available for the hash layout", $op),
            )),
        }
    };
}

/// 只对支持实体级 TTL 的变体执行
macro_rules! with_ttl {
    ($self:expr, $op:literal, $repo:ident => $body:expr) => {
        match $self {
            AnyRepository::Value($repo) => $body,
            AnyRepository::Hash($repo) => $body,
            AnyRepository::ClusterValue($repo) => $body,
            AnyRepository::ClusterHash($repo) => $body,
            AnyRepository::ValueInHash(_) | AnyRepository::ClusterValueInHash(_) => {
                Err(RepoError::Unsupported(format!(
                    "{} is per entity, the shared hash layout only has a collection ttl",
                    $op
                )))
            }
        }
    };
}

impl<T> AnyRepository<T> {
    /// 单机
    pub fn open(
        config: &RepositoryConfig,
        codecs: &Codecs<T>,
        provider: Arc<dyn ConnectionProvider>,
        hook: Option<ErrorHook>,
    ) -> RepoResult<Self> {
        config.validate()?;
        let builder = Self::builder(config, hook);
        Ok(match config.strategy {
            Strategy::Value => AnyRepository::Value(
                builder
                    .value_with(codecs.value(config.mode)?)
                    .build_shared(provider)?,
            ),
            Strategy::Hash => AnyRepository::Hash(
                builder
                    .hash_with(codecs.hash(config.mode)?)
                    .build_shared(provider)?,
            ),
            Strategy::ValueInHash => AnyRepository::ValueInHash(
                builder
                    .value_in_hash_with(codecs.value(config.mode)?)
                    .build_shared(provider)?,
            ),
        })
    }

    /// 集群
    pub fn open_cluster(
        config: &RepositoryConfig,
        codecs: &Codecs<T>,
        handler: Arc<dyn ClusterConnectionHandler>,
        hook: Option<ErrorHook>,
    ) -> RepoResult<Self> {
        config.validate()?;
        let builder = Self::builder(config, hook);
        Ok(match config.strategy {
            Strategy::Value => AnyRepository::ClusterValue(
                builder
                    .value_with(codecs.value(config.mode)?)
                    .build_cluster_shared(handler)?,
            ),
            Strategy::Hash => AnyRepository::ClusterHash(
                builder
                    .hash_with(codecs.hash(config.mode)?)
                    .build_cluster_shared(handler)?,
            ),
            Strategy::ValueInHash => AnyRepository::ClusterValueInHash(
                builder
                    .value_in_hash_with(codecs.value(config.mode)?)
                    .build_cluster_shared(handler)?,
            ),
        })
    }

    fn builder(config: &RepositoryConfig, hook: Option<ErrorHook>) -> RepositoryBuilder {
        RepositoryBuilder::new(config.collection_key.as_str())
            .separator(config.separator.as_str())
            .max_attempts(config.max_attempts)
            .shared_hook(hook)
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            AnyRepository::Value(_) | AnyRepository::ClusterValue(_) => Strategy::Value,
            AnyRepository::Hash(_) | AnyRepository::ClusterHash(_) => Strategy::Hash,
            AnyRepository::ValueInHash(_) | AnyRepository::ClusterValueInHash(_) => {
                Strategy::ValueInHash
            }
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(
            self,
            AnyRepository::ClusterValue(_)
                | AnyRepository::ClusterHash(_)
                | AnyRepository::ClusterValueInHash(_)
        )
    }

    pub fn supports_cas(&self) -> bool {
        self.strategy() != Strategy::Hash
    }

    // ==================== CAS ====================

    pub fn update_if_it_is(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool> {
        with_cas!(self, "update_if_it_is", r => r.update_if_it_is(id, expected, value))
    }

    pub fn update_if_it_is_not(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool> {
        with_cas!(self, "update_if_it_is_not", r => r.update_if_it_is_not(id, expected, value))
    }

    pub fn delete_if_it_is(&self, id: &str, expected: &T) -> RepoResult<bool> {
        with_cas!(self, "delete_if_it_is", r => r.delete_if_it_is(id, expected))
    }

    pub fn delete_if_it_is_not(&self, id: &str, expected: &T) -> RepoResult<bool> {
        with_cas!(self, "delete_if_it_is_not", r => r.delete_if_it_is_not(id, expected))
    }

    // ==================== TTL ====================

    pub fn set_with_ttl(&self, id: &str, value: &T, ttl: Duration) -> RepoResult<()> {
        with_ttl!(self, "set_with_ttl", r => r.set_with_ttl(id, value, ttl))
    }

    pub fn ttl(&self, id: &str) -> RepoResult<Option<Ttl>> {
        with_ttl!(self, "ttl", r => r.ttl(id))
    }

    pub fn expire(&self, id: &str, ttl: Duration) -> RepoResult<bool> {
        with_ttl!(self, "expire", r => r.expire(id, ttl))
    }

    pub fn persist(&self, id: &str) -> RepoResult<bool> {
        with_ttl!(self, "persist", r => r.persist(id))
    }
}

impl<T> Repository<T> for AnyRepository<T> {
    fn collection_key(&self) -> &str {
        each!(self, r => r.collection_key())
    }

    fn get(&self, id: &str) -> RepoResult<Option<T>> {
        each!(self, r => r.get(id))
    }

    fn get_many(&self, ids: &[&str]) -> RepoResult<HashMap<String, T>> {
        each!(self, r => r.get_many(ids))
    }

    fn get_all(&self) -> RepoResult<HashMap<String, T>> {
        each!(self, r => r.get_all())
    }

    fn get_all_ids(&self) -> RepoResult<Vec<String>> {
        each!(self, r => r.get_all_ids())
    }

    fn exists(&self, id: &str) -> RepoResult<bool> {
        each!(self, r => r.exists(id))
    }

    fn set(&self, id: &str, value: &T) -> RepoResult<()> {
        each!(self, r => r.set(id, value))
    }

    fn set_if_exists(&self, id: &str, value: &T) -> RepoResult<bool> {
        each!(self, r => r.set_if_exists(id, value))
    }

    fn set_if_absent(&self, id: &str, value: &T) -> RepoResult<bool> {
        each!(self, r => r.set_if_absent(id, value))
    }

    fn update_if<F, C>(&self, id: &str, updater: F, condition: C) -> RepoResult<Option<bool>>
    where
        F: FnMut(T) -> T,
        C: FnMut(&T) -> bool,
    {
        each!(self, r => r.update_if(id, updater, condition))
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        each!(self, r => r.delete(id))
    }

    fn delete_if<C>(&self, id: &str, condition: C) -> RepoResult<Option<bool>>
    where
        C: FnMut(&T) -> bool,
    {
        each!(self, r => r.delete_if(id, condition))
    }

    fn delete_many(&self, ids: &[&str]) -> RepoResult<usize> {
        each!(self, r => r.delete_many(ids))
    }

    fn delete_all(&self) -> RepoResult<()> {
        each!(self, r => r.delete_all())
    }
}
