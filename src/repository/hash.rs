//! hash 布局：每个实体一个 hash 键，字段由 [`HashCodec`] 决定
//!
//! 写入总是先 DEL 再 HSET（同一个 MULTI 内），旧实体多出来的字段不会残留。
//! 这个布局没有原子 CAS：脚本只能比较单个值。

use redisstore::{KVOperation, RedisConnection};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    ExpiringRepository, Repository, Step, Ttl, optimistic, ttl_from_pttl, ttl_millis,
};
use crate::cluster::ClusterDispatcher;
use crate::codec::HashCodec;
use crate::dispatch::{Dispatcher, NodeDispatcher};
use crate::error::{RepoError, RepoResult};
use crate::key::{KeySpace, validate_id, validate_ids};

type Fields = Vec<(Vec<u8>, Vec<u8>)>;

pub struct HashRepository<T, D = NodeDispatcher> {
    keys: KeySpace,
    codec: Arc<dyn HashCodec<T>>,
    dispatcher: D,
}

pub type ClusterHashRepository<T> = HashRepository<T, ClusterDispatcher>;

impl<T, D: Dispatcher> HashRepository<T, D> {
    pub fn new(keys: KeySpace, codec: Arc<dyn HashCodec<T>>, dispatcher: D) -> Self {
        Self {
            keys,
            codec,
            dispatcher,
        }
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    fn encode(&self, value: &T) -> RepoResult<Fields> {
        let fields = self.codec.encode(value)?;
        if fields.is_empty() {
            return Err(RepoError::Serialization(anyhow::anyhow!(
                "encoded field map must not be empty"
            )));
        }
        Ok(fields)
    }

    fn decode(&self, fields: Fields) -> RepoResult<Option<T>> {
        if fields.is_empty() {
            return Ok(None);
        }
        self.codec.decode(fields).map(Some)
    }

    /// 整体替换实体
    fn replace_ops(key: &[u8], fields: Fields) -> Vec<KVOperation> {
        vec![
            KVOperation::Del {
                keys: vec![key.to_vec()],
            },
            KVOperation::HSet {
                key: key.to_vec(),
                fvs: fields,
            },
        ]
    }

    fn hgetall_each(
        conn: &mut dyn RedisConnection,
        keys: &[&[u8]],
    ) -> RepoResult<Vec<(Vec<u8>, Fields)>> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            entries.push((key.to_vec(), conn.hgetall(key)?));
        }
        Ok(entries)
    }

    fn decode_entries(&self, entries: Vec<(Vec<u8>, Fields)>) -> RepoResult<HashMap<String, T>> {
        let mut found = HashMap::with_capacity(entries.len());
        for (key, fields) in entries {
            let Some(id) = self.keys.id_from_key(&key) else {
                continue;
            };
            if let Some(value) = self.decode(fields)? {
                found.insert(id, value);
            }
        }
        Ok(found)
    }

    fn unsupported_scan(&self, op: &str) -> RepoError {
        RepoError::Unsupported(format!(
            "{} needs a key scan, which the hash layout cannot do in cluster mode",
            op
        ))
    }

    /// WATCH 后检查存在性再整体写入；被并发写入打断时也返回 `false`
    fn set_when(&self, id: &str, value: &T, must_exist: bool) -> RepoResult<bool> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let fields = self.encode(value)?;
        let outcome = self.dispatcher.run(&key, |conn| {
            optimistic(conn, &key, |conn| {
                if conn.exists(&key)? != must_exist {
                    return Ok(Step::Absent);
                }
                Ok(Step::Commit(Self::replace_ops(&key, fields.clone())))
            })
        })?;
        Ok(outcome.unwrap_or(false))
    }
}

impl<T, D: Dispatcher> Repository<T> for HashRepository<T, D> {
    fn collection_key(&self) -> &str {
        self.keys.collection()
    }

    fn get(&self, id: &str) -> RepoResult<Option<T>> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let fields = self.dispatcher.run(&key, |conn| Ok(conn.hgetall(&key)?))?;
        self.decode(fields)
    }

    fn get_many(&self, ids: &[&str]) -> RepoResult<HashMap<String, T>> {
        validate_ids(ids)?;
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<Vec<u8>> = ids.iter().map(|id| self.keys.entity_key(id)).collect();
        let batches = self.dispatcher.run_batches(&keys, Self::hgetall_each)?;
        self.decode_entries(batches.into_iter().flatten().collect())
    }

    fn get_all(&self) -> RepoResult<HashMap<String, T>> {
        if !self.dispatcher.supports_scan() {
            return Err(self.unsupported_scan("get_all"));
        }
        let pattern = self.keys.all_keys_pattern();
        let entries = self.dispatcher.scan(|conn| {
            let keys = conn.keys(&pattern)?;
            let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
            Self::hgetall_each(conn, &refs)
        })?;
        self.decode_entries(entries)
    }

    fn get_all_ids(&self) -> RepoResult<Vec<String>> {
        if !self.dispatcher.supports_scan() {
            return Err(self.unsupported_scan("get_all_ids"));
        }
        let pattern = self.keys.all_keys_pattern();
        let keys = self.dispatcher.scan(|conn| Ok(conn.keys(&pattern)?))?;
        let mut ids: Vec<String> = keys
            .iter()
            .filter_map(|k| self.keys.id_from_key(k))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn exists(&self, id: &str) -> RepoResult<bool> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        self.dispatcher.run(&key, |conn| Ok(conn.exists(&key)?))
    }

    fn set(&self, id: &str, value: &T) -> RepoResult<()> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let ops = Self::replace_ops(&key, self.encode(value)?);
        self.dispatcher.run(&key, |conn| {
            conn.exec(&ops)?;
            Ok(())
        })
    }

    fn set_if_exists(&self, id: &str, value: &T) -> RepoResult<bool> {
        self.set_when(id, value, true)
    }

    fn set_if_absent(&self, id: &str, value: &T) -> RepoResult<bool> {
        self.set_when(id, value, false)
    }

    fn update_if<F, C>(&self, id: &str, mut updater: F, mut condition: C) -> RepoResult<Option<bool>>
    where
        F: FnMut(T) -> T,
        C: FnMut(&T) -> bool,
    {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        self.dispatcher.run(&key, |conn| {
            optimistic(conn, &key, |conn| {
                let Some(current) = self.decode(conn.hgetall(&key)?)? else {
                    return Ok(Step::Absent);
                };
                if !condition(&current) {
                    return Ok(Step::Skip);
                }
                let fields = self.encode(&updater(current))?;
                Ok(Step::Commit(Self::replace_ops(&key, fields)))
            })
        })
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let removed = self
            .dispatcher
            .run(&key, |conn| Ok(conn.del(&[key.as_slice()])?))?;
        Ok(removed > 0)
    }

    fn delete_if<C>(&self, id: &str, mut condition: C) -> RepoResult<Option<bool>>
    where
        C: FnMut(&T) -> bool,
    {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        self.dispatcher.run(&key, |conn| {
            optimistic(conn, &key, |conn| {
                let Some(current) = self.decode(conn.hgetall(&key)?)? else {
                    return Ok(Step::Absent);
                };
                if !condition(&current) {
                    return Ok(Step::Skip);
                }
                Ok(Step::Commit(vec![KVOperation::Del {
                    keys: vec![key.clone()],
                }]))
            })
        })
    }

    fn delete_many(&self, ids: &[&str]) -> RepoResult<usize> {
        validate_ids(ids)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let keys: Vec<Vec<u8>> = ids.iter().map(|id| self.keys.entity_key(id)).collect();
        let counts = self
            .dispatcher
            .run_batches(&keys, |conn, batch| Ok(conn.del(batch)?))?;
        Ok(counts.into_iter().sum())
    }

    fn delete_all(&self) -> RepoResult<()> {
        if !self.dispatcher.supports_scan() {
            return Err(self.unsupported_scan("delete_all"));
        }
        let pattern = self.keys.all_keys_pattern();
        self.dispatcher.scan(|conn| {
            let keys = conn.keys(&pattern)?;
            if !keys.is_empty() {
                let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
                conn.del(&refs)?;
            }
            Ok(())
        })
    }
}

impl<T, D: Dispatcher> ExpiringRepository<T> for HashRepository<T, D> {
    fn set_with_ttl(&self, id: &str, value: &T, ttl: Duration) -> RepoResult<()> {
        validate_id(id)?;
        let ttl_ms = ttl_millis(ttl)?;
        let key = self.keys.entity_key(id);
        let mut ops = Self::replace_ops(&key, self.encode(value)?);
        ops.push(KVOperation::PExpire {
            key: key.clone(),
            ttl_ms,
        });
        self.dispatcher.run(&key, |conn| {
            conn.exec(&ops)?;
            Ok(())
        })
    }

    fn ttl(&self, id: &str) -> RepoResult<Option<Ttl>> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let pttl = self.dispatcher.run(&key, |conn| Ok(conn.pttl(&key)?))?;
        Ok(ttl_from_pttl(pttl))
    }

    fn expire(&self, id: &str, ttl: Duration) -> RepoResult<bool> {
        validate_id(id)?;
        let ttl_ms = ttl_millis(ttl)?;
        let key = self.keys.entity_key(id);
        self.dispatcher
            .run(&key, |conn| Ok(conn.pexpire(&key, ttl_ms)?))
    }

    fn persist(&self, id: &str) -> RepoResult<bool> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        self.dispatcher.run(&key, |conn| Ok(conn.persist(&key)?))
    }
}
