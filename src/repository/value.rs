//! 值布局：每个实体一个字符串键

use redisstore::{CasScript, KVOperation, RedisConnection};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    CasRepository, ExpiringRepository, Repository, Step, Ttl, non_empty, optimistic,
    require_non_empty, ttl_from_pttl, ttl_millis,
};
use crate::cluster::ClusterDispatcher;
use crate::codec::ValueCodec;
use crate::dispatch::{Dispatcher, NodeDispatcher};
use crate::error::{RepoError, RepoResult};
use crate::key::{KeySpace, validate_id, validate_ids};
use crate::script::ScriptCache;

pub struct ValueRepository<T, D = NodeDispatcher> {
    keys: KeySpace,
    codec: Arc<dyn ValueCodec<T>>,
    dispatcher: D,
    scripts: ScriptCache,
}

pub type ClusterValueRepository<T> = ValueRepository<T, ClusterDispatcher>;

impl<T, D: Dispatcher> ValueRepository<T, D> {
    pub fn new(keys: KeySpace, codec: Arc<dyn ValueCodec<T>>, dispatcher: D) -> Self {
        Self {
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

    fn decode_pairs(&self, pairs: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> RepoResult<HashMap<String, T>> {
        let mut found = HashMap::with_capacity(pairs.len());
        for (key, bytes) in pairs {
            let (Some(id), Some(bytes)) = (self.keys.id_from_key(&key), non_empty(bytes)) else {
                continue;
            };
            found.insert(id, self.codec.decode(&bytes)?);
        }
        Ok(found)
    }

    fn mget_pairs(
        conn: &mut dyn RedisConnection,
        keys: &[&[u8]],
    ) -> RepoResult<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        let values = conn.mget(keys)?;
        Ok(keys.iter().map(|k| k.to_vec()).zip(values).collect())
    }

    fn unsupported_scan(&self, op: &str) -> RepoError {
        RepoError::Unsupported(format!(
            "{} needs a key scan, which the value layout cannot do in cluster mode",
            op
        ))
    }

    fn cas(&self, id: &str, script: CasScript, args: &[&[u8]]) -> RepoResult<bool> {
        let key = self.keys.entity_key(id);
        self.dispatcher
            .run(&key, |conn| self.scripts.eval(conn, script, &[key.as_slice()], args))
    }
}

impl<T, D: Dispatcher> Repository<T> for ValueRepository<T, D> {
    fn collection_key(&self) -> &str {
        self.keys.collection()
    }

    fn get(&self, id: &str) -> RepoResult<Option<T>> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let bytes = self.dispatcher.run(&key, |conn| Ok(conn.get(&key)?))?;
        non_empty(bytes)
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    fn get_many(&self, ids: &[&str]) -> RepoResult<HashMap<String, T>> {
        validate_ids(ids)?;
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<Vec<u8>> = ids.iter().map(|id| self.keys.entity_key(id)).collect();
        let batches = self.dispatcher.run_batches(&keys, Self::mget_pairs)?;
        self.decode_pairs(batches.into_iter().flatten().collect())
    }

    fn get_all(&self) -> RepoResult<HashMap<String, T>> {
        if !self.dispatcher.supports_scan() {
            return Err(self.unsupported_scan("get_all"));
        }
        let pattern = self.keys.all_keys_pattern();
        let pairs = self.dispatcher.scan(|conn| {
            let keys = conn.keys(&pattern)?;
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
            Self::mget_pairs(conn, &refs)
        })?;
        self.decode_pairs(pairs)
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
        let bytes = self.encode(value)?;
        self.dispatcher.run(&key, |conn| Ok(conn.set(&key, &bytes)?))
    }

    fn set_if_exists(&self, id: &str, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let bytes = self.encode(value)?;
        self.dispatcher.run(&key, |conn| Ok(conn.set_xx(&key, &bytes)?))
    }

    fn set_if_absent(&self, id: &str, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let bytes = self.encode(value)?;
        self.dispatcher.run(&key, |conn| Ok(conn.set_nx(&key, &bytes)?))
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
                let Some(bytes) = non_empty(conn.get(&key)?) else {
                    return Ok(Step::Absent);
                };
                let current = self.codec.decode(&bytes)?;
                if !condition(&current) {
                    return Ok(Step::Skip);
                }
                let value = self.encode(&updater(current))?;
                Ok(Step::Commit(vec![KVOperation::Set {
                    key: key.clone(),
                    value,
                }]))
            })
        })
    }

    fn delete(&self, id: &str) -> RepoResult<bool> {
        validate_id(id)?;
        let key = self.keys.entity_key(id);
        let removed = self.dispatcher.run(&key, |conn| Ok(conn.del(&[key.as_slice()])?))?;
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
                let Some(bytes) = non_empty(conn.get(&key)?) else {
                    return Ok(Step::Absent);
                };
                if !condition(&self.codec.decode(&bytes)?) {
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

impl<T, D: Dispatcher> CasRepository<T> for ValueRepository<T, D> {
    fn update_if_it_is(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let (expected, value) = (self.encode(expected)?, self.encode(value)?);
        self.cas(id, CasScript::ValueUpdateIfIs, &[expected.as_slice(), value.as_slice()])
    }

    fn update_if_it_is_not(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let (expected, value) = (self.encode(expected)?, self.encode(value)?);
        self.cas(id, CasScript::ValueUpdateIfIsNot, &[expected.as_slice(), value.as_slice()])
    }

    fn delete_if_it_is(&self, id: &str, expected: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let expected = self.encode(expected)?;
        self.cas(id, CasScript::ValueDeleteIfIs, &[expected.as_slice()])
    }

    fn delete_if_it_is_not(&self, id: &str, expected: &T) -> RepoResult<bool> {
        validate_id(id)?;
        let expected = self.encode(expected)?;
        self.cas(id, CasScript::ValueDeleteIfIsNot, &[expected.as_slice()])
    }
}

impl<T, D: Dispatcher> ExpiringRepository<T> for ValueRepository<T, D> {
    fn set_with_ttl(&self, id: &str, value: &T, ttl: Duration) -> RepoResult<()> {
        validate_id(id)?;
        let ttl_ms = ttl_millis(ttl)?;
        let key = self.keys.entity_key(id);
        let bytes = self.encode(value)?;
        self.dispatcher
            .run(&key, |conn| Ok(conn.set_px(&key, &bytes, ttl_ms)?))
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
