//! Redis 存储 trait 定义
//!
//! 把一条阻塞式 Redis 连接抽象成命令集合，仓储层只通过这里的命令访问存储。
//! 连接在 drop 时归还/关闭，调用方用作用域保证每条路径都会释放。

use thiserror::Error;

use crate::operation::KVOperation;

/// Redis 存储错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// 连接失败、超时、连接被断开
    #[error("connection error: {0}")]
    Connection(String),

    /// 服务端返回的其它命令错误
    #[error("command error: {0}")]
    Command(String),

    /// 类型不匹配（如对 Hash 执行 GET）
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// 槽已经迁移到其它节点
    #[error("MOVED {slot} {node}")]
    Moved { slot: u16, node: String },

    /// 槽正在迁移，本次请求需要带 ASKING 发往目标节点
    #[error("ASK {slot} {node}")]
    Ask { slot: u16, node: String },

    /// 多键命令的键不在同一个槽
    #[error("CROSSSLOT Keys in request don't hash to the same slot")]
    CrossSlot,

    /// 脚本缓存中没有该摘要
    #[error("NOSCRIPT No matching script. Please use SCRIPT LOAD.")]
    NoScript,

    /// 脚本执行失败
    #[error("script error: {0}")]
    Script(String),

    /// 无效参数
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 内部错误
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// 是否为集群重定向（MOVED / ASK）
    pub fn is_redirect(&self) -> bool {
        matches!(self, StoreError::Moved { .. } | StoreError::Ask { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 一条 Redis 连接
///
/// 覆盖仓储需要的命令子集：
/// - String: GET, MGET, SET (PX / NX / XX)
/// - Hash: HGET, HMGET, HSET, HSETNX, HDEL, HEXISTS, HGETALL, HKEYS
/// - 通用: DEL, EXISTS, KEYS, PEXPIRE, PTTL, PERSIST
/// - 事务: WATCH, UNWATCH, MULTI/EXEC
/// - 脚本: SCRIPT LOAD, EVALSHA
/// - 集群: ASKING
///
/// WATCH 的状态属于连接本身，所以这里的方法都取 `&mut self`。
pub trait RedisConnection: Send {
    // ==================== String 操作 ====================

    /// GET: 获取字符串值
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// MGET: 批量获取
    fn mget(&mut self, keys: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// SET: 设置字符串值（清除原有过期时间）
    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// SET key value PX ttl_ms
    fn set_px(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> StoreResult<()>;

    /// SET key value NX：仅当键不存在时设置
    fn set_nx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool>;

    /// SET key value XX：仅当键存在时设置
    fn set_xx(&mut self, key: &[u8], value: &[u8]) -> StoreResult<bool>;

    // ==================== Hash 操作 ====================

    /// HGET: 获取 hash 字段值
    fn hget(&mut self, key: &[u8], field: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// HMGET: 批量获取 hash 字段
    fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// HSET key field value [field value ...]，返回新增字段数
    fn hset(&mut self, key: &[u8], fvs: &[(Vec<u8>, Vec<u8>)]) -> StoreResult<usize>;

    /// HSETNX: 仅当字段不存在时设置
    fn hsetnx(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> StoreResult<bool>;

    /// HDEL: 删除 hash 字段
    fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> StoreResult<usize>;

    /// HEXISTS: 检查 hash 字段是否存在
    fn hexists(&mut self, key: &[u8], field: &[u8]) -> StoreResult<bool>;

    /// HGETALL: 获取所有 hash 字段和值
    fn hgetall(&mut self, key: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// HKEYS: 获取所有 hash 字段名
    fn hkeys(&mut self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>>;

    // ==================== 通用操作 ====================

    /// DEL: 删除键（支持多个）
    fn del(&mut self, keys: &[&[u8]]) -> StoreResult<usize>;

    /// EXISTS: 检查键是否存在
    fn exists(&mut self, key: &[u8]) -> StoreResult<bool>;

    /// KEYS: 获取匹配 glob 模式的所有键
    fn keys(&mut self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>>;

    /// PEXPIRE: 设置过期时间（毫秒）
    fn pexpire(&mut self, key: &[u8], ttl_ms: u64) -> StoreResult<bool>;

    /// PTTL: 剩余过期时间（毫秒），-1 表示永不过期，-2 表示键不存在
    fn pttl(&mut self, key: &[u8]) -> StoreResult<i64>;

    /// PERSIST: 移除过期时间
    fn persist(&mut self, key: &[u8]) -> StoreResult<bool>;

    // ==================== 事务 ====================

    /// WATCH: 标记键，EXEC 时若被其它客户端修改则放弃事务
    fn watch(&mut self, keys: &[&[u8]]) -> StoreResult<()>;

    /// UNWATCH: 清除本连接所有被监视的键
    fn unwatch(&mut self) -> StoreResult<()>;

    /// MULTI + 排队命令 + EXEC
    ///
    /// 返回 `false` 表示 EXEC 返回 nil：被监视的键在 WATCH 之后被修改，事务没有执行。
    /// 无论结果如何，EXEC 之后监视状态都会被清除。
    fn exec(&mut self, ops: &[KVOperation]) -> StoreResult<bool>;

    // ==================== 脚本 ====================

    /// SCRIPT LOAD: 上传脚本，返回 SHA1 摘要
    fn script_load(&mut self, body: &str) -> StoreResult<String>;

    /// EVALSHA: 按摘要执行脚本，脚本返回整数
    fn evalsha(&mut self, sha: &str, keys: &[&[u8]], args: &[&[u8]]) -> StoreResult<i64>;

    // ==================== 集群 ====================

    /// ASKING: 允许下一条命令访问正在导入的槽
    ///
    /// 只对紧随其后的一条命令有效，MULTI 之后到 EXEC 为止的事务算一条。
    fn asking(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// 连接提供者（连接池、单连接或直连客户端）
///
/// 每次调用借出一条连接，连接 drop 即归还。
pub trait ConnectionProvider: Send + Sync {
    fn get_connection(&self) -> StoreResult<Box<dyn RedisConnection>>;
}
