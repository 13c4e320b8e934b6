//! 基于 Redis 的通用仓储层
//!
//! 三种存储布局共用一套仓储接口：
//! - 值布局：每个实体一个字符串键 `collection:id`
//! - hash 布局：每个实体一个 hash 键 `collection:id`
//! - 共享 hash 布局：整个集合一个 hash 键，实体是字段
//!
//! 条件修改支持乐观锁（WATCH/MULTI/EXEC）和原子 CAS 脚本（EVALSHA），
//! 集群模式按槽路由并在有限次数内跟随 MOVED/ASK 重定向。
//!
//! ```rust
//! use redis_repo::{CasRepository, JsonCodec, Repository, RepositoryBuilder};
//! use redisstore::MemoryStore;
//!
//! let repo = RepositoryBuilder::new("counters")
//!     .value_in_hash(JsonCodec::<u64>::new())
//!     .build(MemoryStore::new())
//!     .unwrap();
//!
//! repo.set("a", &1).unwrap();
//! assert_eq!(repo.update("a", |n| n + 1).unwrap(), Some(true));
//! assert!(repo.update_if_it_is("a", &2, &10).unwrap());
//! assert_eq!(repo.get("a").unwrap(), Some(10));
//! ```

pub mod builder;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod facade;
pub mod key;
pub mod repository;
pub mod script;

pub use builder::{RepositoryBuilder, StrategyBuilder};
pub use cluster::{ClusterDispatcher, DEFAULT_MAX_ATTEMPTS, group_by_slot};
pub use codec::{
    BincodeCodec, BinaryCodec, BinaryHashCodec, HashCodec, JsonCodec, JsonHashCodec,
    SerializationMode, TextCodec, TextHashCodec, ValueCodec,
};
pub use config::{RepositoryConfig, Strategy};
pub use dispatch::{Dispatcher, NodeDispatcher};
pub use error::{ErrorHook, RepoError, RepoResult};
pub use facade::{AnyRepository, Codecs};
pub use key::{DEFAULT_SEPARATOR, KeySpace, validate_id};
pub use repository::{
    CasRepository, ClusterHashRepository, ClusterValueInHashRepository, ClusterValueRepository,
    ExpiringRepository, HashRepository, Repository, Ttl, ValueInHashRepository, ValueRepository,
};
pub use script::ScriptCache;
