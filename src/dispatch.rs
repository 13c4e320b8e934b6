//! 单机分发
//!
//! 仓储的每一步操作都以闭包的形式交给 [`Dispatcher`]：它负责借出连接、执行、
//! 归还连接（drop），并把存储错误交给错误钩子。集群版本见 [`crate::cluster`]。

use redisstore::{ConnectionProvider, RedisConnection};
use std::sync::Arc;

use crate::error::{ErrorHook, RepoError, RepoResult, observe};

/// 连接分发器
pub trait Dispatcher: Send + Sync {
    /// 在能访问 `key` 的连接上执行 `op`
    ///
    /// 集群模式下遇到重定向会重新执行 `op`，所以它是 `FnMut`。
    fn run<R, F>(&self, key: &[u8], op: F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>;

    /// 多键操作：把 `keys` 拆成可以一起发送的批次，每批一个请求，结果按批返回
    fn run_batches<R, F>(&self, keys: &[Vec<u8>], op: F) -> RepoResult<Vec<R>>
    where
        F: FnMut(&mut dyn RedisConnection, &[&[u8]]) -> RepoResult<R>;

    /// 是否支持整库扫描（KEYS）
    fn supports_scan(&self) -> bool;

    /// 在任意一条连接上执行扫描类操作
    fn scan<R, F>(&self, op: F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>;
}

/// 单机分发器：每次操作借一条连接
#[derive(Clone)]
pub struct NodeDispatcher {
    provider: Arc<dyn ConnectionProvider>,
    hook: Option<ErrorHook>,
}

impl NodeDispatcher {
    pub fn new(provider: Arc<dyn ConnectionProvider>, hook: Option<ErrorHook>) -> Self {
        Self { provider, hook }
    }

    fn with_connection<R, F>(&self, mut op: F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>,
    {
        let result = self
            .provider
            .get_connection()
            .map_err(RepoError::from)
            .and_then(|mut conn| op(conn.as_mut()));
        observe(self.hook.as_ref(), result)
    }
}

impl Dispatcher for NodeDispatcher {
    fn run<R, F>(&self, _key: &[u8], op: F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>,
    {
        self.with_connection(op)
    }

    fn run_batches<R, F>(&self, keys: &[Vec<u8>], mut op: F) -> RepoResult<Vec<R>>
    where
        F: FnMut(&mut dyn RedisConnection, &[&[u8]]) -> RepoResult<R>,
    {
        let batch: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        self.with_connection(|conn| op(conn, &batch).map(|r| vec![r]))
    }

    fn supports_scan(&self) -> bool {
        true
    }

    fn scan<R, F>(&self, op: F) -> RepoResult<R>
    where
        F: FnMut(&mut dyn RedisConnection) -> RepoResult<R>,
    {
        self.with_connection(op)
    }
}
