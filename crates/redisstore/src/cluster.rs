//! 集群连接抽象与内存集群
//!
//! [`ClusterConnectionHandler`] 负责槽到节点连接的映射，执行器在收到 MOVED/ASK 时
//! 通过它刷新槽缓存或直连目标节点。
//!
//! [`MemoryCluster`] 用多个 [`MemoryStore`] 模拟 Redis Cluster：
//! - 服务端维护真实的槽归属，客户端维护一份可能过期的槽缓存
//! - 访问不属于本节点的槽返回 MOVED，迁移中且键已搬走时返回 ASK
//! - 多键命令跨槽时返回 CROSSSLOT

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::memory::{MemoryConnection, MemoryStore};
use crate::operation::KVOperation;
use crate::slot::{TOTAL_SLOTS, key_slot};
use crate::traits::{RedisConnection, StoreError, StoreResult};

/// 集群连接处理器
pub trait ClusterConnectionHandler: Send + Sync {
    /// 按本地槽缓存取得槽所属节点的连接
    fn connection_for_slot(&self, slot: u16) -> StoreResult<Box<dyn RedisConnection>>;

    /// 取得指定节点的连接（ASK 重定向用）
    fn connection_for_node(&self, node: &str) -> StoreResult<Box<dyn RedisConnection>>;

    /// 刷新槽缓存，`moved` 为 MOVED 响应携带的 (槽, 节点) 提示
    fn renew_slot_cache(&self, moved: Option<(u16, &str)>);
}

struct ClusterState {
    names: Vec<String>,
    stores: Vec<MemoryStore>,
    /// 服务端视角：槽 -> 节点下标
    owners: RwLock<Vec<usize>>,
    /// 正在迁移的槽：槽 -> 目标节点下标
    migrating: RwLock<HashMap<u16, usize>>,
    /// 客户端视角的槽缓存
    client_slots: RwLock<Vec<usize>>,
    redirects: AtomicUsize,
}

/// 内存集群
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    /// 创建集群，槽按节点顺序均分
    pub fn new(nodes: &[&str]) -> StoreResult<Self> {
        if nodes.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cluster needs at least one node".to_string(),
            ));
        }
        let n = nodes.len();
        let owners: Vec<usize> = (0..TOTAL_SLOTS as usize)
            .map(|slot| slot * n / TOTAL_SLOTS as usize)
            .collect();
        info!("Created memory cluster with {} nodes", n);
        Ok(Self {
            state: Arc::new(ClusterState {
                names: nodes.iter().map(|s| s.to_string()).collect(),
                stores: nodes.iter().map(|_| MemoryStore::new()).collect(),
                client_slots: RwLock::new(owners.clone()),
                owners: RwLock::new(owners),
                migrating: RwLock::new(HashMap::new()),
                redirects: AtomicUsize::new(0),
            }),
        })
    }

    pub fn node_names(&self) -> &[String] {
        &self.state.names
    }

    /// 槽当前（服务端视角）所属节点
    pub fn owner_of(&self, slot: u16) -> &str {
        let idx = self.state.owners.read()[slot as usize];
        &self.state.names[idx]
    }

    /// 节点对应的存储
    pub fn store(&self, node: &str) -> Option<MemoryStore> {
        self.index_of(node).ok().map(|i| self.state.stores[i].clone())
    }

    /// 键当前所在节点的存储
    pub fn store_for_key(&self, key: &[u8]) -> MemoryStore {
        let idx = self.state.owners.read()[key_slot(key) as usize];
        self.state.stores[idx].clone()
    }

    /// 一次性把槽迁移到目标节点；客户端槽缓存不更新，下一次访问会收到 MOVED
    pub fn migrate_slot(&self, slot: u16, to: &str) -> StoreResult<()> {
        let to = self.index_of(to)?;
        let mut owners = self.state.owners.write();
        let from = owners[slot as usize];
        if from != to {
            let moved = self.state.stores[from].drain_slot(slot);
            debug!(
                "Migrating slot {} from {} to {} ({} keys)",
                slot,
                self.state.names[from],
                self.state.names[to],
                moved.len()
            );
            self.state.stores[to].insert_entries(moved);
            owners[slot as usize] = to;
        }
        self.state.migrating.write().remove(&slot);
        Ok(())
    }

    /// 开始迁移：之后已搬走的键在源节点上返回 ASK
    pub fn begin_migration(&self, slot: u16, to: &str) -> StoreResult<()> {
        let to = self.index_of(to)?;
        self.state.migrating.write().insert(slot, to);
        Ok(())
    }

    /// 迁移过程中搬迁单个键，返回键是否存在
    pub fn migrate_key(&self, key: &[u8]) -> StoreResult<bool> {
        let slot = key_slot(key);
        let to = self
            .state
            .migrating
            .read()
            .get(&slot)
            .copied()
            .ok_or_else(|| StoreError::InvalidArgument(format!("slot {} is not migrating", slot)))?;
        let from = self.state.owners.read()[slot as usize];
        match self.state.stores[from].take_key(key) {
            Some(entry) => {
                self.state.stores[to].insert_entries(vec![(key.to_vec(), entry)]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 结束迁移，搬迁剩余键并切换归属
    pub fn finish_migration(&self, slot: u16) -> StoreResult<()> {
        let to = self
            .state
            .migrating
            .read()
            .get(&slot)
            .copied()
            .ok_or_else(|| StoreError::InvalidArgument(format!("slot {} is not migrating", slot)))?;
        let name = self.state.names[to].clone();
        self.migrate_slot(slot, &name)
    }

    /// 节点返回的 MOVED/ASK 总数
    pub fn redirect_count(&self) -> usize {
        self.state.redirects.load(Ordering::SeqCst)
    }

    /// 所有节点上未释放的连接数
    pub fn open_connections(&self) -> usize {
        self.state.stores.iter().map(|s| s.open_connections()).sum()
    }

    /// 所有节点的键总数
    pub fn dbsize(&self) -> usize {
        self.state.stores.iter().map(|s| s.dbsize()).sum()
    }

    fn index_of(&self, node: &str) -> StoreResult<usize> {
        self.state
            .names
            .iter()
            .position(|n| n == node)
            .ok_or_else(|| StoreError::Connection(format!("unknown cluster node {}", node)))
    }

    fn connect(&self, node: usize) -> ClusterNodeConnection {
        ClusterNodeConnection {
            state: self.state.clone(),
            node,
            conn: self.state.stores[node].connection(),
            asking: false,
        }
    }
}

impl ClusterConnectionHandler for MemoryCluster {
    fn connection_for_slot(&self, slot: u16) -> StoreResult<Box<dyn RedisConnection>> {
        let node = self.state.client_slots.read()[slot as usize];
        Ok(Box::new(self.connect(node)))
    }

    fn connection_for_node(&self, node: &str) -> StoreResult<Box<dyn RedisConnection>> {
        let idx = self.index_of(node)?;
        Ok(Box::new(self.connect(idx)))
    }

    fn renew_slot_cache(&self, moved: Option<(u16, &str)>) {
        match moved.and_then(|(slot, node)| self.index_of(node).ok().map(|i| (slot, i))) {
            Some((slot, idx)) => self.state.client_slots.write()[slot as usize] = idx,
            None => {
                let owners = self.state.owners.read().clone();
                *self.state.client_slots.write() = owners;
            }
        }
    }
}

/// 集群中某个节点上的连接：每条命令先做槽检查
struct ClusterNodeConnection {
    state: Arc<ClusterState>,
    node: usize,
    conn: MemoryConnection,
    /// ASKING 标记：只对下一条命令有效，`exec` 整个事务算一条
    asking: bool,
}

impl ClusterNodeConnection {
    /// 槽检查，同时消费 ASKING 标记
    fn route(&mut self, keys: &[&[u8]]) -> StoreResult<()> {
        let asking = std::mem::take(&mut self.asking);
        let Some(first) = keys.first() else {
            return Ok(());
        };
        let slot = key_slot(first);
        if keys.iter().any(|k| key_slot(k) != slot) {
            return Err(StoreError::CrossSlot);
        }

        let owner = self.state.owners.read()[slot as usize];
        let migrating_to = self.state.migrating.read().get(&slot).copied();

        if owner == self.node {
            if let Some(target) = migrating_to {
                let store = &self.state.stores[self.node];
                if keys.iter().any(|k| !store.contains_key(k)) {
                    self.state.redirects.fetch_add(1, Ordering::SeqCst);
                    return Err(StoreError::Ask {
                        slot,
                        node: self.state.names[target].clone(),
                    });
                }
            }
            return Ok(());
        }
        if asking && migrating_to == Some(self.node) {
            return Ok(());
        }
        self.state.redirects.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Moved {
            slot,
            node: self.state.names[owner].clone(),
        })
    }
}

impl RedisConnection for ClusterNodeConnection {
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.route(&[key])?;
        self.conn.get(key)
    }

    fn mget(&mut self, keys: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.route(keys)?;
        self.conn.mget(keys)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.route(&[key])?;
        self.conn.set(key, value)
    }

    fn set_px(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> StoreResult<()> {
        self.route(&[key])?;
        self.conn.set_px(key, value, ttl_ms)
    }

    fn set_nx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.route(&[key])?;
        self.conn.set_nx(key, value)
    }

    fn set_xx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.route(&[key])?;
        self.conn.set_xx(key, value)
    }

    fn hget(&mut self, key: &[u8], field: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.route(&[key])?;
        self.conn.hget(key, field)
    }

    fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.route(&[key])?;
        self.conn.hmget(key, fields)
    }

    fn hset(&mut self, key: &[u8], fvs: &[(Vec<u8>, Vec<u8>)]) -> StoreResult<usize> {
        self.route(&[key])?;
        self.conn.hset(key, fvs)
    }

    fn hsetnx(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.route(&[key])?;
        self.conn.hsetnx(key, field, value)
    }

    fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<usize> {
        self.route(&[key])?;
        self.conn.hdel(key, fields)
    }

    fn hexists(&mut self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        self.route(&[key])?;
        self.conn.hexists(key, field)
    }

    fn hgetall(&mut self, key: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.route(&[key])?;
        self.conn.hgetall(key)
    }

    fn hkeys(&mut self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        self.route(&[key])?;
        self.conn.hkeys(key)
    }

    fn del(&mut self, keys: &[&[u8]]) -> StoreResult<usize> {
        self.route(keys)?;
        self.conn.del(keys)
    }

    fn exists(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.route(&[key])?;
        self.conn.exists(key)
    }

    /// 只返回本节点的键
    fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        self.asking = false;
        self.conn.keys(pattern)
    }

    fn pexpire(&mut self, key: &[u8], ttl_ms: u64) -> StoreResult<bool> {
        self.route(&[key])?;
        self.conn.pexpire(key, ttl_ms)
    }

    fn pttl(&mut self, key: &[u8]) -> StoreResult<i64> {
        self.route(&[key])?;
        self.conn.pttl(key)
    }

    fn persist(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.route(&[key])?;
        self.conn.persist(key)
    }

    fn watch(&mut self, keys: &[&[u8]]) -> StoreResult<()> {
        self.route(keys)?;
        self.conn.watch(keys)
    }

    fn unwatch(&mut self) -> StoreResult<()> {
        self.asking = false;
        self.conn.unwatch()
    }

    fn exec(&mut self, ops: &[KVOperation]) -> StoreResult<bool> {
        let keys: Vec<&[u8]> = ops.iter().flat_map(|op| op.keys()).collect();
        if let Err(e) = self.route(&keys) {
            // EXECABORT：丢弃事务和监视状态
            let _ = self.conn.unwatch();
            return Err(e);
        }
        self.conn.exec(ops)
    }

    fn script_load(&mut self, body: &str) -> StoreResult<String> {
        self.asking = false;
        self.conn.script_load(body)
    }

    fn evalsha(&mut self, sha: &str, keys: &[&[u8]], args: &[&[u8]]) -> StoreResult<i64> {
        self.route(keys)?;
        self.conn.evalsha(sha, keys, args)
    }

    fn asking(&mut self) -> StoreResult<()> {
        self.asking = true;
        Ok(())
    }
}

/// ASK 重定向后的目标节点连接：每条命令之前先发 ASKING
///
/// ASKING 只覆盖紧随其后的一条命令，乐观锁的 WATCH、读和 EXEC
/// 都需要各自的 ASKING。
pub struct AskingConnection {
    inner: Box<dyn RedisConnection>,
}

impl AskingConnection {
    pub fn new(inner: Box<dyn RedisConnection>) -> Self {
        Self { inner }
    }
}

impl RedisConnection for AskingConnection {
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.asking()?;
        self.inner.get(key)
    }

    fn mget(&mut self, keys: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.inner.asking()?;
        self.inner.mget(keys)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.asking()?;
        self.inner.set(key, value)
    }

    fn set_px(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> StoreResult<()> {
        self.inner.asking()?;
        self.inner.set_px(key, value, ttl_ms)
    }

    fn set_nx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.set_nx(key, value)
    }

    fn set_xx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.set_xx(key, value)
    }

    fn hget(&mut self, key: &[u8], field: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.asking()?;
        self.inner.hget(key, field)
    }

    fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.inner.asking()?;
        self.inner.hmget(key, fields)
    }

    fn hset(&mut self, key: &[u8], fvs: &[(Vec<u8>, Vec<u8>)]) -> StoreResult<usize> {
        self.inner.asking()?;
        self.inner.hset(key, fvs)
    }

    fn hsetnx(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.hsetnx(key, field, value)
    }

    fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<usize> {
        self.inner.asking()?;
        self.inner.hdel(key, fields)
    }

    fn hexists(&mut self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.hexists(key, field)
    }

    fn hgetall(&mut self, key: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.asking()?;
        self.inner.hgetall(key)
    }

    fn hkeys(&mut self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        self.inner.asking()?;
        self.inner.hkeys(key)
    }

    fn del(&mut self, keys: &[&[u8]]) -> StoreResult<usize> {
        self.inner.asking()?;
        self.inner.del(keys)
    }

    fn exists(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.exists(key)
    }

    fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        self.inner.keys(pattern)
    }

    fn pexpire(&mut self, key: &[u8], ttl_ms: u64) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.pexpire(key, ttl_ms)
    }

    fn pttl(&mut self, key: &[u8]) -> StoreResult<i64> {
        self.inner.asking()?;
        self.inner.pttl(key)
    }

    fn persist(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.persist(key)
    }

    fn watch(&mut self, keys: &[&[u8]]) -> StoreResult<()> {
        self.inner.asking()?;
        self.inner.watch(keys)
    }

    fn unwatch(&mut self) -> StoreResult<()> {
        self.inner.unwatch()
    }

    /// MULTI 之前的一次 ASKING 覆盖整个事务
    fn exec(&mut self, ops: &[KVOperation]) -> StoreResult<bool> {
        self.inner.asking()?;
        self.inner.exec(ops)
    }

    fn script_load(&mut self, body: &str) -> StoreResult<String> {
        self.inner.script_load(body)
    }

    fn evalsha(&mut self, sha: &str, keys: &[&[u8]], args: &[&[u8]]) -> StoreResult<i64> {
        self.inner.asking()?;
        self.inner.evalsha(sha, keys, args)
    }

    fn asking(&mut self) -> StoreResult<()> {
        self.inner.asking()
    }
}
