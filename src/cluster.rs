//! 集群分发
//!
//! 按物理键所在的槽取连接，处理重定向：
//! - MOVED：用响应里的节点刷新槽缓存后重试
//! - ASK：下一次直接连目标节点重试，每条命令之前都带 ASKING
//!
//! 重试次数受 `max_attempts` 限制，耗尽后返回 [`RepoError::RetriesExhausted`]。
//! 其它错误不重试。

use redisstore::{
    AskingConnection, ClusterConnectionHandler, RedisConnection, StoreError, key_slot,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::error::{ErrorHook, RepoError, RepoResult, observe};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// 按槽分组，组的顺序和组内键的顺序都保持首次出现的顺序
pub fn group_by_slot<K: AsRef<[u8]>>(keys: &[K]) -> Vec<(u16, Vec<&[u8]>)> {
    let mut groups: Vec<(u16, Vec<&[u8]>)> = Vec::new();
    let mut index: HashMap<u16, usize> = HashMap::new();
    for key in keys {
        let key = key.as_ref();
        let slot = key_slot(key);
        let at = *index.entry(slot).or_insert_with(|| {
            groups.push((slot, Vec::new()));
            groups.len() - 1
        });
        groups[at].1.push(key);
    }
    groups
}

/// 集群分发器
#[derive(Clone)]
pub struct ClusterDispatcher {
    handler: Arc<dyn ClusterConnectionHandler>,
    max_attempts: u32,
    hook: Option<ErrorHook>,
}

impl ClusterDispatcher {
    pub fn new(
        handler: Arc<dyn ClusterConnectionHandler>,
        max_attempts: u32,
        hook: Option<ErrorHook>,
    ) -> RepoResult<Self> {
        if max_attempts == 0 {
            return Err(RepoError::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            handler,
            max_attempts,
            hook,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn attempt<R, F>(&self, slot: u16, ask: Option<&str>, op: &mut F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>,
    {
        let mut conn: Box<dyn RedisConnection> = match ask {
            Some(node) => Box::new(AskingConnection::new(self.handler.connection_for_node(node)?)),
            None => self.handler.connection_for_slot(slot)?,
        };
        op(conn.as_mut())
    }

    fn run_on_slot<R, F>(&self, slot: u16, op: &mut F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>,
    {
        let mut ask: Option<String> = None;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.attempt(slot, ask.as_deref(), op) {
                Ok(r) => return Ok(r),
                Err(RepoError::Store(e)) if e.is_redirect() => e,
                Err(e) => return Err(e),
            };

            if attempts >= self.max_attempts {
                warn!(
                    "Giving up on slot {} after {} attempts: {}",
                    slot, attempts, err
                );
                return Err(RepoError::RetriesExhausted {
                    attempts,
                    source: err,
                });
            }

            match &err {
                StoreError::Moved {
                    slot: moved,
                    node,
                } => {
                    warn!("Slot {} moved to {}, renewing slot cache", moved, node);
                    self.handler.renew_slot_cache(Some((*moved, node.as_str())));
                    ask = None;
                }
                StoreError::Ask { node, .. } => {
                    debug!("Slot {} is migrating, asking {}", slot, node);
                    ask = Some(node.clone());
                }
                _ => return Err(RepoError::Store(err.clone())),
            }
        }
    }
}

impl Dispatcher for ClusterDispatcher {
    fn run<R, F>(&self, key: &[u8], mut op: F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>,
    {
        let result = self.run_on_slot(key_slot(key), &mut op);
        observe(self.hook.as_ref(), result)
    }

    fn run_batches<R, F>(&self, keys: &[Vec<u8>], mut op: F) -> RepoResult<Vec<R>>
    where
        F: FnMut(&mut dyn RedisConnection, &[&[u8]]) -> RepoResult<R>,
    {
        let groups = group_by_slot(keys);
        debug!("Split {} keys into {} slot groups", keys.len(), groups.len());
        let mut results = Vec::with_capacity(groups.len());
        for (slot, batch) in &groups {
            let mut step = |conn: &mut dyn RedisConnection| op(conn, batch.as_slice());
            match self.run_on_slot(*slot, &mut step) {
                Ok(r) => results.push(r),
                Err(e) => return observe(self.hook.as_ref(), Err(e)),
            }
        }
        Ok(results)
    }

    fn supports_scan(&self) -> bool {
        false
    }

    fn scan<R, F>(&self, _op: F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>,
    {
        Err(RepoError::Unsupported(
            "key scans are not supported in cluster mode".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use redisstore::MemoryCluster;
    use std::collections::HashSet;

    #[test]
    fn test_group_by_slot() {
        let keys: Vec<Vec<u8>> = vec![
            b"{a}1".to_vec(),
            b"{b}1".to_vec(),
            b"{a}2".to_vec(),
            b"{c}1".to_vec(),
            b"{b}2".to_vec(),
        ];
        let groups = group_by_slot(&keys);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].0, key_slot(b"a"));
        assert_eq!(groups[0].1, vec![&b"{a}1"[..], &b"{a}2"[..]]);
        assert_eq!(groups[1].1, vec![&b"{b}1"[..], &b"{b}2"[..]]);
        assert_eq!(groups[2].1, vec![&b"{c}1"[..]]);
    }

    #[test]
    fn test_group_by_slot_random_keys() {
        let mut rng = rand::rng();
        let keys: Vec<String> = (0..500)
            .map(|_| format!("orders:{}", rng.random_range(0..10_000u32)))
            .collect();
        let groups = group_by_slot(&keys);

        let total: usize = groups.iter().map(|(_, g)| g.len()).sum();
        assert_eq!(total, keys.len());
        let slots: HashSet<u16> = groups.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots.len(), groups.len());
        for (slot, group) in &groups {
            assert!(group.iter().all(|k| key_slot(k) == *slot));
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let cluster = MemoryCluster::new(&["a"]).unwrap();
        assert!(matches!(
            ClusterDispatcher::new(Arc::new(cluster), 0, None),
            Err(RepoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_follows_moved() {
        let cluster = MemoryCluster::new(&["a", "b"]).unwrap();
        let dispatcher = ClusterDispatcher::new(Arc::new(cluster.clone()), 5, None).unwrap();
        let key = b"orders:1";
        let slot = key_slot(key);

        dispatcher.run(key, |conn| Ok(conn.set(key, b"v")?)).unwrap();
        let other = if cluster.owner_of(slot) == "a" { "b" } else { "a" };
        cluster.migrate_slot(slot, other).unwrap();

        let value = dispatcher.run(key, |conn| Ok(conn.get(key)?)).unwrap();
        assert_eq!(value, Some(b"v".to_vec()));
        assert_eq!(cluster.redirect_count(), 1);
        assert_eq!(cluster.open_connections(), 0);
    }

    #[test]
    fn test_scan_unsupported() {
        let cluster = MemoryCluster::new(&["a"]).unwrap();
        let dispatcher = ClusterDispatcher::new(Arc::new(cluster), 5, None).unwrap();
        assert!(!dispatcher.supports_scan());
        let r = dispatcher.scan(|conn| Ok(conn.keys(b"*")?));
        assert!(matches!(r, Err(RepoError::Unsupported(_))));
    }
}
