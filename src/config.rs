//! 仓储配置
//!
//! 可以从 JSON 读取，缺省字段取默认值：
//!
//! ```json
//! { "collection_key": "orders", "strategy": "value_in_hash", "mode": "binary" }
//! ```

use serde::{Deserialize, Serialize};

use crate::cluster::DEFAULT_MAX_ATTEMPTS;
use crate::codec::SerializationMode;
use crate::error::{RepoError, RepoResult};
use crate::key::{DEFAULT_SEPARATOR, KeySpace};

/// 存储布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// 每个实体一个字符串键
    #[default]
    Value,
    /// 每个实体一个 hash 键
    Hash,
    /// 整个集合一个 hash 键
    ValueInHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// 集合键，不能包含分隔符
    pub collection_key: String,

    #[serde(default = "default_separator")]
    pub separator: String,

    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default)]
    pub mode: SerializationMode,

    /// 集群模式下单次操作的最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl RepositoryConfig {
    pub fn new(collection_key: impl Into<String>) -> Self {
        Self {
            collection_key: collection_key.into(),
            separator: default_separator(),
            strategy: Strategy::default(),
            mode: SerializationMode::default(),
            max_attempts: default_max_attempts(),
        }
    }

    pub fn from_json(json: &str) -> RepoResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RepoError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 与构造器相同的检查
    pub fn validate(&self) -> RepoResult<()> {
        KeySpace::new(self.collection_key.as_str(), self.separator.as_str())?;
        if self.max_attempts == 0 {
            return Err(RepoError::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
