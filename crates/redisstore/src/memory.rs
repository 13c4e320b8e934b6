//! 内存存储实现
//!
//! 使用 HashMap 实现的单节点 Redis，覆盖仓储用到的 String/Hash 命令、
//! WATCH/MULTI/EXEC 乐观锁、脚本缓存与 EVALSHA（仅限 [`CasScript`] 目录中的脚本）。
//! 另外支持故障注入，便于测试错误路径。

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::operation::KVOperation;
use crate::script::{CasScript, sha1_hex};
use crate::slot::key_slot;
use crate::traits::{ConnectionProvider, RedisConnection, StoreError, StoreResult};

/// Redis 值类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisValue {
    String(Vec<u8>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
}

/// 带过期时间的值
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    value: RedisValue,
    expire_at: Option<Instant>,
}

impl Entry {
    fn new(value: RedisValue) -> Self {
        Self {
            value,
            expire_at: None,
        }
    }

    fn with_ttl(value: RedisValue, ttl: Duration) -> Self {
        Self {
            value,
            expire_at: Some(Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expire_at.is_some_and(|t| Instant::now() >= t)
    }

    fn pttl(&self) -> i64 {
        match self.expire_at {
            Some(t) => {
                let now = Instant::now();
                if now >= t {
                    -2 // 已过期
                } else {
                    (t - now).as_millis() as i64
                }
            }
            None => -1, // 永不过期
        }
    }
}

fn wrong_args(cmd: &str) -> StoreError {
    StoreError::InvalidArgument(format!("wrong number of arguments for '{}' command", cmd))
}

/// 键空间
#[derive(Default)]
struct Keyspace {
    entries: HashMap<Vec<u8>, Entry>,
    /// 键最后一次被修改时的逻辑时钟（WATCH 用），键删除后仍保留
    versions: HashMap<Vec<u8>, u64>,
    clock: u64,
    /// 摘要 -> 脚本源码
    scripts: HashMap<String, String>,
}

impl Keyspace {
    fn touch(&mut self, key: &[u8]) {
        self.clock += 1;
        self.versions.insert(key.to_vec(), self.clock);
    }

    fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// 获取值，自动跳过过期的
    fn live(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.is_expired())
    }

    /// 获取可变值，顺便清理过期键
    fn live_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired()) {
            self.entries.remove(key);
            self.touch(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn string(&self, key: &[u8]) -> StoreResult<Option<&Vec<u8>>> {
        match self.live(key) {
            Some(Entry {
                value: RedisValue::String(v),
                ..
            }) => Ok(Some(v)),
            Some(_) => Err(StoreError::WrongType),
            None => Ok(None),
        }
    }

    fn hash(&self, key: &[u8]) -> StoreResult<Option<&HashMap<Vec<u8>, Vec<u8>>>> {
        match self.live(key) {
            Some(Entry {
                value: RedisValue::Hash(h),
                ..
            }) => Ok(Some(h)),
            Some(_) => Err(StoreError::WrongType),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        let value = RedisValue::String(value.to_vec());
        let entry = match ttl {
            Some(ttl) => Entry::with_ttl(value, ttl),
            None => Entry::new(value),
        };
        self.entries.insert(key.to_vec(), entry);
        self.touch(key);
    }

    fn hset(&mut self, key: &[u8], fvs: &[(Vec<u8>, Vec<u8>)]) -> StoreResult<usize> {
        if fvs.is_empty() {
            return Err(wrong_args("hset"));
        }
        // 先清理过期键，再按需创建
        self.live_mut(key);
        let entry = self
            .entries
            .entry(key.to_vec())
            .or_insert_with(|| Entry::new(RedisValue::Hash(HashMap::new())));
        let RedisValue::Hash(hash) = &mut entry.value else {
            return Err(StoreError::WrongType);
        };
        let mut added = 0;
        for (f, v) in fvs {
            if hash.insert(f.clone(), v.clone()).is_none() {
                added += 1;
            }
        }
        self.touch(key);
        Ok(added)
    }

    fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<usize> {
        if fields.is_empty() {
            return Err(wrong_args("hdel"));
        }
        let Some(entry) = self.live_mut(key) else {
            return Ok(0);
        };
        let RedisValue::Hash(hash) = &mut entry.value else {
            return Err(StoreError::WrongType);
        };
        let removed = fields.iter().filter(|f| hash.remove(**f).is_some()).count();
        // 空 hash 等同于键不存在
        if hash.is_empty() {
            self.entries.remove(key);
        }
        if removed > 0 {
            self.touch(key);
        }
        Ok(removed)
    }

    fn del(&mut self, keys: &[&[u8]]) -> usize {
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = self.entries.remove(*key) {
                if !entry.is_expired() {
                    removed += 1;
                }
                self.touch(key);
            }
        }
        removed
    }

    fn pexpire(&mut self, key: &[u8], ttl_ms: u64) -> bool {
        if self.live_mut(key).is_none() {
            return false;
        }
        if ttl_ms == 0 {
            self.entries.remove(key);
        } else if let Some(entry) = self.entries.get_mut(key) {
            entry.expire_at = Some(Instant::now() + Duration::from_millis(ttl_ms));
        }
        self.touch(key);
        true
    }

    fn persist(&mut self, key: &[u8]) -> bool {
        let had_ttl = match self.live_mut(key) {
            Some(entry) => entry.expire_at.take().is_some(),
            None => return false,
        };
        if had_ttl {
            self.touch(key);
        }
        had_ttl
    }

    fn apply(&mut self, op: &KVOperation) -> StoreResult<()> {
        match op {
            KVOperation::Set { key, value } => self.set(key, value, None),
            KVOperation::SetPx { key, value, ttl_ms } => {
                if *ttl_ms == 0 {
                    return Err(StoreError::InvalidArgument(
                        "invalid expire time in 'set' command".to_string(),
                    ));
                }
                self.set(key, value, Some(Duration::from_millis(*ttl_ms)))
            }
            KVOperation::HSet { key, fvs } => {
                self.hset(key, fvs)?;
            }
            KVOperation::HDel { key, fields } => {
                let fields: Vec<&[u8]> = fields.iter().map(|f| f.as_slice()).collect();
                self.hdel(key, &fields)?;
            }
            KVOperation::Del { keys } => {
                let keys: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
                self.del(&keys);
            }
            KVOperation::PExpire { key, ttl_ms } => {
                self.pexpire(key, *ttl_ms);
            }
        }
        Ok(())
    }

    /// 执行 CAS 脚本，整个过程持有写锁，因此是原子的
    fn eval(&mut self, script: CasScript, keys: &[&[u8]], args: &[&[u8]]) -> StoreResult<i64> {
        let key = *keys
            .first()
            .ok_or_else(|| StoreError::Script("missing KEYS[1]".to_string()))?;
        let arg = |i: usize| {
            args.get(i)
                .copied()
                .ok_or_else(|| StoreError::Script(format!("missing ARGV[{}]", i + 1)))
        };

        if script.is_field() {
            let field = arg(0)?;
            let expected = arg(1)?;
            let current = self.hash(key)?.and_then(|h| h.get(field)).cloned();
            if !script.guard(current.as_deref(), expected) {
                return Ok(0);
            }
            if script.is_delete() {
                self.hdel(key, &[field])?;
            } else {
                let value = arg(2)?;
                self.hset(key, &[(field.to_vec(), value.to_vec())])?;
            }
        } else {
            let expected = arg(0)?;
            let current = self.string(key)?.cloned();
            if !script.guard(current.as_deref(), expected) {
                return Ok(0);
            }
            if script.is_delete() {
                self.del(&[key]);
            } else {
                let value = arg(1)?;
                self.set(key, value, None);
            }
        }
        Ok(1)
    }
}

struct StoreInner {
    keyspace: RwLock<Keyspace>,
    open_connections: AtomicUsize,
    /// 待注入的故障，每条命令消费一个
    faults: Mutex<VecDeque<StoreError>>,
}

/// 内存存储实现
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                keyspace: RwLock::new(Keyspace::default()),
                open_connections: AtomicUsize::new(0),
                faults: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// 打开一条新连接
    pub fn connection(&self) -> MemoryConnection {
        self.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        MemoryConnection {
            store: self.clone(),
            watched: Vec::new(),
        }
    }

    /// 当前未释放的连接数
    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    /// 让接下来的一条命令失败
    pub fn inject_fault(&self, err: StoreError) {
        self.inner.faults.lock().push_back(err);
    }

    /// SCRIPT FLUSH：清空脚本缓存
    pub fn script_flush(&self) {
        self.inner.keyspace.write().scripts.clear();
        debug!("Flushed memory store script cache");
    }

    /// 已缓存的脚本数
    pub fn script_count(&self) -> usize {
        self.inner.keyspace.read().scripts.len()
    }

    /// DBSIZE: 获取未过期键的数量
    pub fn dbsize(&self) -> usize {
        let ks = self.inner.keyspace.read();
        ks.entries.values().filter(|e| !e.is_expired()).count()
    }

    /// FLUSHDB: 清空所有数据
    pub fn flushdb(&self) {
        let mut ks = self.inner.keyspace.write();
        let keys: Vec<Vec<u8>> = ks.entries.keys().cloned().collect();
        ks.entries.clear();
        for key in keys {
            ks.touch(&key);
        }
    }

    /// 原始值（测试检查用）
    pub fn raw(&self, key: &[u8]) -> Option<RedisValue> {
        self.inner.keyspace.read().live(key).map(|e| e.value.clone())
    }

    pub(crate) fn contains_key(&self, key: &[u8]) -> bool {
        self.inner.keyspace.read().live(key).is_some()
    }

    /// 取出某个槽的全部键（槽迁移用）
    pub(crate) fn drain_slot(&self, slot: u16) -> Vec<(Vec<u8>, Entry)> {
        let mut ks = self.inner.keyspace.write();
        let keys: Vec<Vec<u8>> = ks
            .entries
            .keys()
            .filter(|k| key_slot(k) == slot)
            .cloned()
            .collect();
        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = ks.entries.remove(&key) {
                ks.touch(&key);
                if !entry.is_expired() {
                    drained.push((key, entry));
                }
            }
        }
        drained
    }

    /// 取出单个键（槽迁移过程中逐键搬迁）
    pub(crate) fn take_key(&self, key: &[u8]) -> Option<Entry> {
        let mut ks = self.inner.keyspace.write();
        let entry = ks.entries.remove(key)?;
        ks.touch(key);
        (!entry.is_expired()).then_some(entry)
    }

    pub(crate) fn insert_entries(&self, entries: Vec<(Vec<u8>, Entry)>) {
        let mut ks = self.inner.keyspace.write();
        for (key, entry) in entries {
            ks.touch(&key);
            ks.entries.insert(key, entry);
        }
    }

    fn check_fault(&self) -> StoreResult<()> {
        match self.inner.faults.lock().pop_front() {
            Some(err) => {
                debug!("Injected fault: {}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProvider for MemoryStore {
    fn get_connection(&self) -> StoreResult<Box<dyn RedisConnection>> {
        self.check_fault()?;
        Ok(Box::new(self.connection()))
    }
}

/// 内存存储上的一条连接，持有自己的 WATCH 状态
pub struct MemoryConnection {
    store: MemoryStore,
    /// 被监视的键及其 WATCH 时的版本
    watched: Vec<(Vec<u8>, u64)>,
}

impl MemoryConnection {
    fn keyspace(&self) -> &RwLock<Keyspace> {
        &self.store.inner.keyspace
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store
            .inner
            .open_connections
            .fetch_sub(1, Ordering::SeqCst);
    }
}

impl RedisConnection for MemoryConnection {
    // ==================== String 操作 ====================

    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.store.check_fault()?;
        Ok(self.keyspace().read().string(key)?.cloned())
    }

    fn mget(&mut self, keys: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.store.check_fault()?;
        if keys.is_empty() {
            return Err(wrong_args("mget"));
        }
        let ks = self.keyspace().read();
        // MGET 对类型不匹配的键返回 nil
        Ok(keys
            .iter()
            .map(|k| ks.string(k).ok().flatten().cloned())
            .collect())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.store.check_fault()?;
        self.keyspace().write().set(key, value, None);
        Ok(())
    }

    fn set_px(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> StoreResult<()> {
        self.store.check_fault()?;
        self.keyspace().write().apply(&KVOperation::SetPx {
            key: key.to_vec(),
            value: value.to_vec(),
            ttl_ms,
        })
    }

    fn set_nx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.store.check_fault()?;
        let mut ks = self.keyspace().write();
        if ks.live_mut(key).is_some() {
            return Ok(false);
        }
        ks.set(key, value, None);
        Ok(true)
    }

    fn set_xx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.store.check_fault()?;
        let mut ks = self.keyspace().write();
        if ks.live_mut(key).is_none() {
            return Ok(false);
        }
        ks.set(key, value, None);
        Ok(true)
    }

    // ==================== Hash 操作 ====================

    fn hget(&mut self, key: &[u8], field: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.store.check_fault()?;
        let ks = self.keyspace().read();
        Ok(ks.hash(key)?.and_then(|h| h.get(field)).cloned())
    }

    fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.store.check_fault()?;
        if fields.is_empty() {
            return Err(wrong_args("hmget"));
        }
        let ks = self.keyspace().read();
        match ks.hash(key)? {
            Some(hash) => Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect()),
            None => Ok(vec![None; fields.len()]),
        }
    }

    fn hset(&mut self, key: &[u8], fvs: &[(Vec<u8>, Vec<u8>)]) -> StoreResult<usize> {
        self.store.check_fault()?;
        self.keyspace().write().hset(key, fvs)
    }

    fn hsetnx(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> StoreResult<bool> {
        self.store.check_fault()?;
        let mut ks = self.keyspace().write();
        if ks.hash(key)?.is_some_and(|h| h.contains_key(field)) {
            return Ok(false);
        }
        ks.hset(key, &[(field.to_vec(), value.to_vec())])?;
        Ok(true)
    }

    fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<usize> {
        self.store.check_fault()?;
        self.keyspace().write().hdel(key, fields)
    }

    fn hexists(&mut self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        self.store.check_fault()?;
        let ks = self.keyspace().read();
        Ok(ks.hash(key)?.is_some_and(|h| h.contains_key(field)))
    }

    fn hgetall(&mut self, key: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.store.check_fault()?;
        let ks = self.keyspace().read();
        Ok(ks
            .hash(key)?
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn hkeys(&mut self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        self.store.check_fault()?;
        let ks = self.keyspace().read();
        Ok(ks
            .hash(key)?
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    // ==================== 通用操作 ====================

    fn del(&mut self, keys: &[&[u8]]) -> StoreResult<usize> {
        self.store.check_fault()?;
        if keys.is_empty() {
            return Err(wrong_args("del"));
        }
        Ok(self.keyspace().write().del(keys))
    }

    fn exists(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.store.check_fault()?;
        Ok(self.keyspace().read().live(key).is_some())
    }

    fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        self.store.check_fault()?;
        let ks = self.keyspace().read();
        Ok(ks
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn pexpire(&mut self, key: &[u8], ttl_ms: u64) -> StoreResult<bool> {
        self.store.check_fault()?;
        Ok(self.keyspace().write().pexpire(key, ttl_ms))
    }

    fn pttl(&mut self, key: &[u8]) -> StoreResult<i64> {
        self.store.check_fault()?;
        Ok(self.keyspace().read().live(key).map_or(-2, |e| e.pttl()))
    }

    fn persist(&mut self, key: &[u8]) -> StoreResult<bool> {
        self.store.check_fault()?;
        Ok(self.keyspace().write().persist(key))
    }

    // ==================== 事务 ====================

    fn watch(&mut self, keys: &[&[u8]]) -> StoreResult<()> {
        self.store.check_fault()?;
        let versions: Vec<(Vec<u8>, u64)> = {
            let ks = self.keyspace().read();
            keys.iter().map(|k| (k.to_vec(), ks.version(k))).collect()
        };
        self.watched.extend(versions);
        trace!("WATCH {} key(s)", keys.len());
        Ok(())
    }

    fn unwatch(&mut self) -> StoreResult<()> {
        self.store.check_fault()?;
        self.watched.clear();
        Ok(())
    }

    fn exec(&mut self, ops: &[KVOperation]) -> StoreResult<bool> {
        let watched = std::mem::take(&mut self.watched);
        self.store.check_fault()?;

        let mut ks = self.keyspace().write();
        if let Some((key, _)) = watched.iter().find(|(k, v)| ks.version(k) != *v) {
            debug!(
                "EXEC aborted, watched key {} was modified",
                String::from_utf8_lossy(key)
            );
            return Ok(false);
        }

        // 与 Redis 一致：单条命令失败不回滚其它命令，EXEC 之后返回第一个错误
        let mut first_err = None;
        for op in ops {
            if let Err(e) = ks.apply(op) {
                debug!("{} failed inside EXEC: {}", op.name(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    // ==================== 脚本 ====================

    fn script_load(&mut self, body: &str) -> StoreResult<String> {
        self.store.check_fault()?;
        let sha = sha1_hex(body);
        self.keyspace()
            .write()
            .scripts
            .insert(sha.clone(), body.to_string());
        Ok(sha)
    }

    fn evalsha(&mut self, sha: &str, keys: &[&[u8]], args: &[&[u8]]) -> StoreResult<i64> {
        self.store.check_fault()?;
        let mut ks = self.keyspace().write();
        let body = ks.scripts.get(sha).ok_or(StoreError::NoScript)?;
        let script = CasScript::from_body(body).ok_or_else(|| {
            StoreError::Script(format!("memory store cannot run script {}", sha))
        })?;
        ks.eval(script, keys, args)
    }
}

/// Redis 风格的 glob 匹配：支持 `*`、`?`、`[...]`（含 `^`/`!` 取反与区间）和 `\` 转义
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => match match_class(pattern, p, text[t]) {
                    Some((true, next)) => {
                        p = next;
                        t += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    // 没有闭合的 [ 按字面量处理
                    None if text[t] == b'[' => {
                        p += 1;
                        t += 1;
                        continue;
                    }
                    None => {}
                },
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        // 回溯到上一个 *
        match star {
            Some((sp, st)) => {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// 匹配字符类，返回 (是否匹配, 字符类之后的位置)；没有闭合的 ] 时返回 None
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < pattern.len() && (pattern[i] == b'^' || pattern[i] == b'!');
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        if pattern[i] == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        let mut lo = pattern[i];
        if lo == b'\\' && i + 1 < pattern.len() {
            i += 1;
            lo = pattern[i];
        }
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let hi = pattern[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if lo <= c && c <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}
