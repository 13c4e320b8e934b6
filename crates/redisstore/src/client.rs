//! 基于 `redis` crate 的真实连接
//!
//! - [`RedisClientProvider`]：单机 Redis，每次借出一条新连接
//! - [`RedisClusterHandler`]：Redis Cluster，槽缓存由 MOVED 提示逐步学习

use parking_lot::RwLock;
use redis::{Client, Connection, ErrorKind, RedisError};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::cluster::ClusterConnectionHandler;
use crate::operation::KVOperation;
use crate::traits::{ConnectionProvider, RedisConnection, StoreError, StoreResult};

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        match err.kind() {
            ErrorKind::Moved | ErrorKind::Ask => match err.redirect_node() {
                Some((node, slot)) if err.kind() == ErrorKind::Moved => StoreError::Moved {
                    slot,
                    node: node.to_string(),
                },
                Some((node, slot)) => StoreError::Ask {
                    slot,
                    node: node.to_string(),
                },
                None => StoreError::Command(err.to_string()),
            },
            ErrorKind::NoScriptError => StoreError::NoScript,
            ErrorKind::CrossSlot => StoreError::CrossSlot,
            ErrorKind::IoError => StoreError::Connection(err.to_string()),
            _ if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() => {
                StoreError::Connection(err.to_string())
            }
            _ if err.code() == Some("WRONGTYPE") => StoreError::WrongType,
            _ => StoreError::Command(err.to_string()),
        }
    }
}

/// 包装 `redis::Connection`
pub struct RedisClientConnection {
    conn: Connection,
}

impl RedisClientConnection {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl RedisConnection for RedisClientConnection {
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(redis::cmd("GET").arg(key).query(&mut self.conn)?)
    }

    fn mget(&mut self, keys: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(*key);
        }
        Ok(cmd.query(&mut self.conn)?)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        Ok(redis::cmd("SET").arg(key).arg(value).query(&mut self.conn)?)
    }

    fn set_px(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> StoreResult<()> {
        Ok(redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query(&mut self.conn)?)
    }

    fn set_nx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query(&mut self.conn)?;
        Ok(reply.is_some())
    }

    fn set_xx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .query(&mut self.conn)?;
        Ok(reply.is_some())
    }

    fn hget(&mut self, key: &[u8], field: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(redis::cmd("HGET").arg(key).arg(field).query(&mut self.conn)?)
    }

    fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }
        Ok(cmd.query(&mut self.conn)?)
    }

    fn hset(&mut self, key: &[u8], fvs: &[(Vec<u8>, Vec<u8>)]) -> StoreResult<usize> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fvs {
            cmd.arg(field.as_slice()).arg(value.as_slice());
        }
        Ok(cmd.query(&mut self.conn)?)
    }

    fn hsetnx(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> StoreResult<bool> {
        Ok(redis::cmd("HSETNX")
            .arg(key)
            .arg(field)
            .arg(value)
            .query(&mut self.conn)?)
    }

    fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<usize> {
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }
        Ok(cmd.query(&mut self.conn)?)
    }

    fn hexists(&mut self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        Ok(redis::cmd("HEXISTS").arg(key).arg(field).query(&mut self.conn)?)
    }

    fn hgetall(&mut self, key: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(redis::cmd("HGETALL").arg(key).query(&mut self.conn)?)
    }

    fn hkeys(&mut self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(redis::cmd("HKEYS").arg(key).query(&mut self.conn)?)
    }

    fn del(&mut self, keys: &[&[u8]]) -> StoreResult<usize> {
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(*key);
        }
        Ok(cmd.query(&mut self.conn)?)
    }

    fn exists(&mut self, key: &[u8]) -> StoreResult<bool> {
        Ok(redis::cmd("EXISTS").arg(key).query(&mut self.conn)?)
    }

    fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(redis::cmd("KEYS").arg(pattern).query(&mut self.conn)?)
    }

    fn pexpire(&mut self, key: &[u8], ttl_ms: u64) -> StoreResult<bool> {
        Ok(redis::cmd("PEXPIRE").arg(key).arg(ttl_ms).query(&mut self.conn)?)
    }

    fn pttl(&mut self, key: &[u8]) -> StoreResult<i64> {
        Ok(redis::cmd("PTTL").arg(key).query(&mut self.conn)?)
    }

    fn persist(&mut self, key: &[u8]) -> StoreResult<bool> {
        Ok(redis::cmd("PERSIST").arg(key).query(&mut self.conn)?)
    }

    fn watch(&mut self, keys: &[&[u8]]) -> StoreResult<()> {
        let mut cmd = redis::cmd("WATCH");
        for key in keys {
            cmd.arg(*key);
        }
        Ok(cmd.query(&mut self.conn)?)
    }

    fn unwatch(&mut self) -> StoreResult<()> {
        Ok(redis::cmd("UNWATCH").query(&mut self.conn)?)
    }

    fn exec(&mut self, ops: &[KVOperation]) -> StoreResult<bool> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                KVOperation::Set { key, value } => {
                    pipe.cmd("SET").arg(key.as_slice()).arg(value.as_slice()).ignore();
                }
                KVOperation::SetPx { key, value, ttl_ms } => {
                    pipe.cmd("SET")
                        .arg(key.as_slice())
                        .arg(value.as_slice())
                        .arg("PX")
                        .arg(*ttl_ms)
                        .ignore();
                }
                KVOperation::HSet { key, fvs } => {
                    let cmd = pipe.cmd("HSET").arg(key.as_slice());
                    for (field, value) in fvs {
                        cmd.arg(field.as_slice()).arg(value.as_slice());
                    }
                    cmd.ignore();
                }
                KVOperation::HDel { key, fields } => {
                    let cmd = pipe.cmd("HDEL").arg(key.as_slice());
                    for field in fields {
                        cmd.arg(field.as_slice());
                    }
                    cmd.ignore();
                }
                KVOperation::Del { keys } => {
                    let cmd = pipe.cmd("DEL");
                    for key in keys {
                        cmd.arg(key.as_slice());
                    }
                    cmd.ignore();
                }
                KVOperation::PExpire { key, ttl_ms } => {
                    pipe.cmd("PEXPIRE").arg(key.as_slice()).arg(*ttl_ms).ignore();
                }
            }
        }
        // EXEC 返回 nil 表示被监视的键已被修改
        let reply: Option<Vec<redis::Value>> = pipe.query(&mut self.conn)?;
        Ok(reply.is_some())
    }

    fn script_load(&mut self, body: &str) -> StoreResult<String> {
        Ok(redis::cmd("SCRIPT").arg("LOAD").arg(body).query(&mut self.conn)?)
    }

    fn evalsha(&mut self, sha: &str, keys: &[&[u8]], args: &[&[u8]]) -> StoreResult<i64> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }
        Ok(cmd.query(&mut self.conn)?)
    }

    fn asking(&mut self) -> StoreResult<()> {
        Ok(redis::cmd("ASKING").query(&mut self.conn)?)
    }
}

/// 单机 Redis 连接提供者
pub struct RedisClientProvider {
    client: Client,
}

impl RedisClientProvider {
    /// `url` 形如 `redis://127.0.0.1:6379/0`
    pub fn open(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        Ok(Self { client })
    }
}

impl ConnectionProvider for RedisClientProvider {
    fn get_connection(&self) -> StoreResult<Box<dyn RedisConnection>> {
        let conn = self.client.get_connection()?;
        Ok(Box::new(RedisClientConnection::new(conn)))
    }
}

/// Redis Cluster 连接处理器
///
/// 槽缓存初始为空，未知槽发往第一个种子节点，再由 MOVED 提示修正。
pub struct RedisClusterHandler {
    seeds: Vec<String>,
    clients: RwLock<HashMap<String, Client>>,
    slots: RwLock<HashMap<u16, String>>,
}

impl RedisClusterHandler {
    /// `seeds` 为节点地址，`host:port` 或完整的 `redis://` URL
    pub fn new(seeds: &[&str]) -> StoreResult<Self> {
        if seeds.is_empty() {
            return Err(StoreError::InvalidArgument(
                "at least one seed node is required".to_string(),
            ));
        }
        Ok(Self {
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
            clients: RwLock::new(HashMap::new()),
            slots: RwLock::new(HashMap::new()),
        })
    }

    fn client_for(&self, node: &str) -> StoreResult<Client> {
        if let Some(client) = self.clients.read().get(node) {
            return Ok(client.clone());
        }
        let url = if node.contains("://") {
            node.to_string()
        } else {
            format!("redis://{}", node)
        };
        let client = Client::open(url.as_str())?;
        self.clients
            .write()
            .insert(node.to_string(), client.clone());
        Ok(client)
    }
}

impl ClusterConnectionHandler for RedisClusterHandler {
    fn connection_for_slot(&self, slot: u16) -> StoreResult<Box<dyn RedisConnection>> {
        let node = self
            .slots
            .read()
            .get(&slot)
            .cloned()
            .unwrap_or_else(|| self.seeds[0].clone());
        self.connection_for_node(&node)
    }

    fn connection_for_node(&self, node: &str) -> StoreResult<Box<dyn RedisConnection>> {
        let conn = self.client_for(node)?.get_connection().map_err(|e| {
            warn!("Failed to connect to cluster node {}: {}", node, e);
            StoreError::from(e)
        })?;
        Ok(Box::new(RedisClientConnection::new(conn)))
    }

    fn renew_slot_cache(&self, moved: Option<(u16, &str)>) {
        match moved {
            Some((slot, node)) => {
                debug!("Slot {} now served by {}", slot, node);
                self.slots.write().insert(slot, node.to_string());
            }
            None => self.slots.write().clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let io: RedisError = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(StoreError::from(io), StoreError::Connection(_)));

        let other: RedisError = (ErrorKind::TypeError, "bad type").into();
        assert!(matches!(StoreError::from(other), StoreError::Command(_)));
    }

    #[test]
    fn test_cluster_handler_needs_seed() {
        assert!(RedisClusterHandler::new(&[]).is_err());
        let handler = RedisClusterHandler::new(&["127.0.0.1:7000"]).unwrap();
        handler.renew_slot_cache(Some((1, "127.0.0.1:7001")));
        assert_eq!(handler.slots.read().get(&1).map(String::as_str), Some("127.0.0.1:7001"));
        handler.renew_slot_cache(None);
        assert!(handler.slots.read().is_empty());
    }
}
