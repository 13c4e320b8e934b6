use redisstore::StoreError;
use thiserror::Error;
use tracing::warn;

/// 仓储错误
#[derive(Debug, Error)]
pub enum RepoError {
    /// 参数非法（空 id、零 TTL 等），在任何 I/O 之前返回
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 集合键或分隔符非法
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 当前存储布局或部署模式不支持该操作
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(anyhow::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 集群重定向次数耗尽，`source` 为最后一次的存储错误
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted { attempts: u32, source: StoreError },
}

impl RepoError {
    /// 是否来自存储（只有这类错误会交给错误钩子）
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            RepoError::Store(_) | RepoError::RetriesExhausted { .. }
        )
    }

    pub(crate) fn serialization(err: impl Into<anyhow::Error>) -> Self {
        RepoError::Serialization(err.into())
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// 存储错误观察回调：先回调，再把错误返回给调用方
pub type ErrorHook = std::sync::Arc<dyn Fn(&RepoError) + Send + Sync>;

/// 把存储错误交给钩子，结果原样返回
pub(crate) fn observe<R>(hook: Option<&ErrorHook>, result: RepoResult<R>) -> RepoResult<R> {
    if let Err(e) = &result {
        if e.is_store_error() {
            match hook {
                Some(hook) => hook(e),
                None => warn!("Store operation failed: {}", e),
            }
        }
    }
    result
}
