//! Redis 存储访问层
//!
//! 把 Redis 命令抽象成阻塞式连接 trait，供上层仓储使用：
//! - [`RedisConnection`] / [`ConnectionProvider`]：单机连接与连接借出
//! - [`ClusterConnectionHandler`]：集群模式下按槽取连接、处理重定向
//! - [`CasScript`]：条件更新/删除用的 Lua 脚本
//! - [`key_slot`]：CRC16 槽计算
//!
//! 实现：
//! - [`MemoryStore`] / [`MemoryCluster`]：内存实现，用于测试
//! - [`RedisClientProvider`] / [`RedisClusterHandler`]：基于 `redis` crate 的真实连接
//!
//! # 示例
//! ```rust
//! use redisstore::{ConnectionProvider, MemoryStore, RedisConnection};
//!
//! let store = MemoryStore::new();
//! let mut conn = store.get_connection().unwrap();
//! conn.set(b"key", b"value").unwrap();
//! assert_eq!(conn.get(b"key").unwrap(), Some(b"value".to_vec()));
//! ```

mod client;
mod cluster;
mod memory;
mod operation;
mod script;
mod slot;
mod traits;

pub use client::{RedisClientConnection, RedisClientProvider, RedisClusterHandler};
pub use cluster::{AskingConnection, ClusterConnectionHandler, MemoryCluster};
pub use memory::{MemoryConnection, MemoryStore, RedisValue, glob_match};
pub use operation::KVOperation;
pub use script::{CasScript, sha1_hex};
pub use slot::{TOTAL_SLOTS, key_slot};
pub use traits::{ConnectionProvider, RedisConnection, StoreError, StoreResult};
