//! 共享 hash 布局：整个集合是一个 hash 键，实体是其中的字段
//!
//! 所有实体都在同一个键上，集群模式下也只落在一个槽里，所以 `get_all`、
//! `delete_all` 等整集合操作都是单条命令。代价是不同 id 的乐观锁更新
//! 会在父键上互相冲突。

use redisstore::{CasScript, KVOperation};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    CasRepository, Repository, Step, Ttl, non_empty, optimistic, require_non_empty,
    ttl_from_pttl, ttl_millis,
};
use crate::cluster::ClusterDispatcher;
use crate::codec::ValueCodec;
use crate::dispatch::{Dispatcher, NodeDispatcher};
use crate::error::RepoResult;
use crate::key::{KeySpace, validate_id, validate_ids};
use crate::script::ScriptCache;

pub struct ValueInHashRepository<T, D = NodeDispatcher> {
    keys: KeySpace,
    parent: Vec<u8>,
    codec: Arc<dyn ValueCodec<T>>,
    dispatcher: D,
    scripts: ScriptCache,
}

pub type ClusterValueInHashRepository<T> = ValueInHashRepository<T, ClusterDispatcher>;

impl<T, D: Dispatcher> ValueInHashRepository<T, D> {
    pub fn new(keys: KeySpace, codec: Arc<dyn ValueCodec<T>>, dispatcher: D) -> Self {
        Self {
            parent: keys.parent_key(),
            keys,
            codec,
            dispatcher,
            scripts: ScriptCache::new(),
        }
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    fn encode(&self, value: &T) -> RepoResult<Vec<u8>> {
        require_non_empty(self.codec.encode(value)?)
    }

    fn cas(&self, script: CasScript, args: &[&[u8]]) -> RepoResult<bool> {
        let parent = self.parent.as_slice();
        self.dispatcher
            .run(parent, |conn| self.scripts.eval(conn, script, &[parent], args))
    }

    /// 集合键的剩余存活时间，集合不存在时返回 `None`
    ///
    /// hash 字段没有自己的过期时间，过期只能作用于整个集合。
    pub fn collection_ttl(&self) -> RepoResult<Option<Ttl>> {
        let parent = self.parent.as_slice();
        let pttl = self.dispatcher.run(parent, |conn| Ok(conn.pttl(parent)?))?;
        Ok(ttl_from_pttl(pttl))
    }

    pub fn expire_collection(&self, ttl: Duration) -> RepoResult<bool> {
        let ttl_ms = ttl_millis(ttl)?;
        let parent = self.parent.as_slice();
        self.dispatcher
            .run(parent, |conn| Ok(conn.pexpire(parent, ttl_ms)?))
    }

    pub fn persist_collection(&self) -> RepoResult<bool> {
        let parent = self.parent.as_slice();
        self.dispatcher.run(parent, |conn| Ok(conn.persist(parent)?))
    }
}

impl<T, D: Dispatcher> Repository<T> for ValueInHashRepository<T, D> {
    fn collection_key(&self) -> &str {
        self.keys.collection()
    }

    fn get(&self, id: &str) -> RepoResult<Option<T>> {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        let bytes = self
            .dispatcher
            .run(parent, |conn| Ok(conn.hget(parent, id.as_bytes())?))?;
        non_empty(bytes)
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    fn get_many(&self, ids: &[&str]) -> RepoResult<HashMap<String, T>> {
        validate_ids(ids)?;
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let parent = self.parent.as_slice();
        let fields: Vec<&[u8]> = ids.iter().map(|id| id.as_bytes()).collect();
        let values = self
            .dispatcher
            .run(parent, |conn| Ok(conn.hmget(parent, &fields)?))?;

        let mut found = HashMap::with_capacity(ids.len());
        for (id, bytes) in ids.iter().zip(values) {
            if let Some(bytes) = non_empty(bytes) {
                found.insert(id.to_string(), self.codec.decode(&bytes)?);
            }
        }
        Ok(found)
    }

    fn get_all(&self) -> RepoResult<HashMap<String, T>> {
        let parent = self.parent.as_slice();
        let entries = self.dispatcher.run(parent, |conn| Ok(conn.hgetall(parent)?))?;

        let mut found = HashMap::with_capacity(entries.len());
        for (field, bytes) in entries {
            let Ok(id) = String::from_utf8(field) else {
                continue;
            };
            if let Some(bytes) = non_empty(Some(bytes)) {
                found.insert(id, self.codec.decode(&bytes)?);
            }
        }
        Ok(found)
    }

    fn get_all_ids(&self) -> RepoResult<Vec<String>> {
        let parent = self.parent.as_slice();
        let fields = self.dispatcher.run(parent, |conn| Ok(conn.hkeys(parent)?))?;
        let mut ids: Vec<String> = fields
            .into_iter()
            .filter_map(|f| String::from_utf8(f).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn exists(&self, id: &str) -> RepoResult<bool> {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        self.dispatcher
            .run(parent, |conn| Ok(conn.hexists(parent, id.as_bytes())?))
    }

    fn set(&self, id: &str, value: &T) -> RepoResult<()> {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        let fvs = [(id.as_bytes().to_vec(), self.encode(value)?)];
        self.dispatcher.run(parent, |conn| {
            conn.hset(parent, &fvs)?;
            Ok(())
        })
    }

    /// 父键上的乐观锁：同集合内其它 id 的并发写入也会让它返回 `false`
    fn set_if_exists(&self, id: &str, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        let bytes = self.encode(value)?;
        let outcome = self.dispatcher.run(parent, |conn| {
            optimistic(conn, parent, |conn| {
                if !conn.hexists(parent, id.as_bytes())? {
                    return Ok(Step::Absent);
                }
                Ok(Step::Commit(vec![KVOperation::HSet {
                    key: parent.to_vec(),
                    fvs: vec![(id.as_bytes().to_vec(), bytes.clone())],
                }]))
            })
        })?;
        Ok(outcome.unwrap_or(false))
    }

    fn set_if_absent(&self, id: &str, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        let bytes = self.encode(value)?;
        self.dispatcher
            .run(parent, |conn| Ok(conn.hsetnx(parent, id.as_bytes(), &bytes)?))
    }

    fn update_if<F, C>(&self, id: &str, mut updater: F, mut condition: C) -> RepoResult<Option<bool>>
    where
        F: FnMut(T) -> T,
        C: FnMut(&T) -> bool,
    {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        self.dispatcher.run(parent, |conn| {
            optimistic(conn, parent, |conn| {
                let Some(bytes) = non_empty(conn.hget(parent, id.as_bytes())?) else {
                    return Ok(Step::Absent);
                };
                let current = self.codec.decode(&bytes)?;
                if !condition(&current) {
                    return Ok(Step::Skip);
                }
                let value = self.encode(&updater(current))?;
                Ok(Step::Commit(vec![KVOperation::HSet {
                    key: parent.to_vec(),
                    fvs: vec![(id.as_bytes().to_vec(), value)],
                }]))
            })
        })
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        let removed = self
            .dispatcher
            .run(parent, |conn| Ok(conn.hdel(parent, &[id.as_bytes()])?))?;
        Ok(removed > 0)
    }

    fn delete_if<C>(&self, id: &str, mut condition: C) -> RepoResult<Option<bool>>
    where
        C: FnMut(&T) -> bool,
    {
        validate_id(id)?;
        let parent = self.parent.as_slice();
        self.dispatcher.run(parent, |conn| {
            optimistic(conn, parent, |conn| {
                let Some(bytes) = non_empty(conn.hget(parent, id.as_bytes())?) else {
                    return Ok(Step::Absent);
                };
                if !condition(&self.codec.decode(&bytes)?) {
                    return Ok(Step::Skip);
                }
                Ok(Step::Commit(vec![KVOperation::HDel {
                    key: parent.to_vec(),
                    fields: vec![id.as_bytes().to_vec()],
                }]))
            })
        })
    }

    fn delete_many(&self, ids: &[&str]) -> RepoResult<usize> {
        validate_ids(ids)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let parent = self.parent.as_slice();
        let fields: Vec<&[u8]> = ids.iter().map(|id| id.as_bytes()).collect();
        self.dispatcher
            .run(parent, |conn| Ok(conn.hdel(parent, &fields)?))
    }

    /// 单条 DEL，与同集合的并发写入之间是原子的
    fn delete_all(&self) -> RepoResult<()> {
        let parent = self.parent.as_slice();
        self.dispatcher.run(parent, |conn| {
            conn.del(&[parent])?;
            Ok(())
        })
    }
}

impl<T, D: Dispatcher> CasRepository<T> for ValueInHashRepository<T, D> {
    fn update_if_it_is(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let (expected, value) = (self.encode(expected)?, self.encode(value)?);
        self.cas(
            CasScript::FieldUpdateIfIs,
            &[id.as_bytes(), expected.as_slice(), value.as_slice()],
        )
    }

    fn update_if_it_is_not(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let (expected, value) = (self.encode(expected)?, self.encode(value)?);
        self.cas(
            CasScript::FieldUpdateIfIsNot,
            &[id.as_bytes(), expected.as_slice(), value.as_slice()],
        )
    }

    fn delete_if_it_is(&self, id: &str, expected: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let expected = self.encode(expected)?;
        self.cas(
            CasScript::FieldDeleteIfIs,
            &[id.as_bytes(), expected.as_slice()],
        )
    }

    fn delete_if_it_is_not(&self, id: &str, expected: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let expected = self.encode(expected)?;
        self.cas(
            CasScript::FieldDeleteIfIsNot,
            &[id.as_bytes(), expected.as_slice()],
        )
    }
}
