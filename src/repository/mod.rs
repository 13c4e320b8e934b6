//! 仓储接口与三种存储布局
//!
//! | 布局 | 物理结构 | 类型 |
//! |------|----------|------|
//! | 值 | 每个实体一个字符串键 `collection:id` | [`ValueRepository`] |
//! | hash | 每个实体一个 hash 键 `collection:id` | [`HashRepository`] |
//! | 共享 hash | 一个 hash 键 `collection`，实体是字段 `id` | [`ValueInHashRepository`] |
//!
//! 条件修改有两条路径：
//! - 乐观锁（WATCH/MULTI/EXEC）：`update`、`update_if`、`delete_if`
//! - 原子脚本（EVALSHA）：[`CasRepository`] 的四个方法，hash 布局不提供

mod hash;
mod value;
mod value_in_hash;

pub use hash::{ClusterHashRepository, HashRepository};
pub use value::{ClusterValueRepository, ValueRepository};
pub use value_in_hash::{ClusterValueInHashRepository, ValueInHashRepository};

use redisstore::{KVOperation, RedisConnection};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{RepoError, RepoResult};

/// 实体的剩余存活时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// 没有过期时间
    Persistent,
    Expiring(Duration),
}

/// 通用仓储接口
///
/// 读取不存在的实体返回 `None`，不是错误。id 为空或全是空白时，
/// 在访问存储之前返回 [`RepoError::InvalidArgument`]。
pub trait Repository<T> {
    fn collection_key(&self) -> &str;

    fn get(&self, id: &str) -> RepoResult<Option<T>>;

    /// 批量读取，只返回存在的实体
    fn get_many(&self, ids: &[&str]) -> RepoResult<HashMap<String, T>>;

    fn get_all(&self) -> RepoResult<HashMap<String, T>>;

    /// 所有 id，按字典序排列
    fn get_all_ids(&self) -> RepoResult<Vec<String>>;

    fn exists(&self, id: &str) -> RepoResult<bool>;

    fn set(&self, id: &str, value: &T) -> RepoResult<()>;

    /// 仅当实体已存在时写入，返回是否写入
    fn set_if_exists(&self, id: &str, value: &T) -> RepoResult<bool>;

    /// 仅当实体不存在时写入，返回是否写入
    fn set_if_absent(&self, id: &str, value: &T) -> RepoResult<bool>;

    /// 乐观锁读改写
    ///
    /// - `None`：实体不存在，什么也没做
    /// - `Some(true)`：已提交
    /// - `Some(false)`：读取之后键被其它客户端修改，事务放弃，调用方自行决定是否重试
    fn update<F>(&self, id: &str, updater: F) -> RepoResult<Option<bool>>
    where
        F: FnMut(T) -> T,
    {
        self.update_if(id, updater, |_| true)
    }

    /// 同 [`Repository::update`]，`condition` 不满足时不写入并返回 `Some(true)`
    fn update_if<F, C>(&self, id: &str, updater: F, condition: C) -> RepoResult<Option<bool>>
    where
        F: FnMut(T) -> T,
        C: FnMut(&T) -> bool;

    /// 删除实体，返回是否真的删除了。实体不存在不是错误
    fn delete(&self, id: &str) -> RepoResult<bool>;

    /// 乐观锁条件删除，返回值含义同 [`Repository::update_if`]
    fn delete_if<C>(&self, id: &str, condition: C) -> RepoResult<Option<bool>>
    where
        C: FnMut(&T) -> bool;

    /// 批量删除，返回删除的数量
    fn delete_many(&self, ids: &[&str]) -> RepoResult<usize>;

    fn delete_all(&self) -> RepoResult<()>;
}

/// 原子比较并交换，比较的是编码后的字节
pub trait CasRepository<T>: Repository<T> {
    /// 当前值等于 `expected` 时写入 `value`，返回是否写入
    fn update_if_it_is(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool>;

    /// 当前值存在且不等于 `expected` 时写入 `value`
    fn update_if_it_is_not(&self, id: &str, expected: &T, value: &T) -> RepoResult<bool>;

    fn delete_if_it_is(&self, id: &str, expected: &T) -> RepoResult<bool>;

    fn delete_if_it_is_not(&self, id: &str, expected: &T) -> RepoResult<bool>;
}

/// 实体级过期时间（值布局和 hash 布局）
pub trait ExpiringRepository<T>: Repository<T> {
    fn set_with_ttl(&self, id: &str, value: &T, ttl: Duration) -> RepoResult<()>;

    /// 实体不存在时返回 `None`
    fn ttl(&self, id: &str) -> RepoResult<Option<Ttl>>;

    /// 设置过期时间，实体不存在时返回 `false`
    fn expire(&self, id: &str, ttl: Duration) -> RepoResult<bool>;

    /// 移除过期时间，返回是否移除
    fn persist(&self, id: &str) -> RepoResult<bool>;
}

// ==================== 公共步骤 ====================

/// 乐观锁事务中读取之后的决定
pub(crate) enum Step {
    /// 实体不存在
    Absent,
    /// 条件不满足，不写入
    Skip,
    /// 在 MULTI/EXEC 中执行这些写操作
    Commit(Vec<KVOperation>),
}

/// WATCH `watched` → `plan` 读取并决定 → EXEC
///
/// `plan` 出错时尽力 UNWATCH 后返回原错误。
pub(crate) fn optimistic<F>(
    conn: &mut dyn RedisConnection,
    watched: &[u8],
    plan: F,
) -> RepoResult<Option<bool>>
where
    F: FnOnce(&mut dyn RedisConnection) -> RepoResult<Step>,
{
    conn.watch(&[watched])?;
    let step = match plan(&mut *conn) {
        Ok(step) => step,
        Err(e) => {
            let _ = conn.unwatch();
            return Err(e);
        }
    };
    match step {
        Step::Absent => {
            conn.unwatch()?;
            Ok(None)
        }
        Step::Skip => {
            conn.unwatch()?;
            Ok(Some(true))
        }
        Step::Commit(ops) => {
            let committed = conn.exec(&ops)?;
            if !committed {
                debug!(
                    "Optimistic update on {} aborted by a concurrent write",
                    String::from_utf8_lossy(watched)
                );
            }
            Ok(Some(committed))
        }
    }
}

/// 空值视为不存在
pub(crate) fn non_empty(bytes: Option<Vec<u8>>) -> Option<Vec<u8>> {
    bytes.filter(|b| !b.is_empty())
}

/// 写入前拒绝空编码，否则写入的实体读回来是"不存在"
pub(crate) fn require_non_empty(bytes: Vec<u8>) -> RepoResult<Vec<u8>> {
    if bytes.is_empty() {
        return Err(RepoError::Serialization(anyhow::anyhow!(
            "encoded value must not be empty"
        )));
    }
    Ok(bytes)
}

/// TTL 转毫秒，至少 1ms
pub(crate) fn ttl_millis(ttl: Duration) -> RepoResult<u64> {
    let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return Err(RepoError::InvalidArgument(
            "ttl must be at least one millisecond".to_string(),
        ));
    }
    Ok(ms)
}

/// PTTL 结果：-2 不存在，-1 永不过期
pub(crate) fn ttl_from_pttl(pttl: i64) -> Option<Ttl> {
    match pttl {
        -2 => None,
        ms if ms < 0 => Some(Ttl::Persistent),
        ms => Some(Ttl::Expiring(Duration::from_millis(ms as u64))),
    }
}
