//! 键模型
//!
//! 集合键 + 分隔符 + 实体 id 组成物理键；共享 hash 布局下集合键本身就是父键。

use crate::error::{RepoError, RepoResult};

pub const DEFAULT_SEPARATOR: &str = ":";

/// 一个集合的键空间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    collection: String,
    separator: String,
}

impl KeySpace {
    pub fn new(collection: impl Into<String>, separator: impl Into<String>) -> RepoResult<Self> {
        let collection = collection.into();
        let separator = separator.into();
        if collection.trim().is_empty() {
            return Err(RepoError::InvalidKey(
                "collection key must not be empty".to_string(),
            ));
        }
        if separator.is_empty() {
            return Err(RepoError::InvalidKey(
                "separator must not be empty".to_string(),
            ));
        }
        if collection.contains(&separator) {
            return Err(RepoError::InvalidKey(format!(
                "collection key {:?} must not contain separator {:?}",
                collection, separator
            )));
        }
        Ok(Self {
            collection,
            separator,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// 实体键：`collection + sep + id`
    pub fn entity_key(&self, id: &str) -> Vec<u8> {
        let mut key =
            Vec::with_capacity(self.collection.len() + self.separator.len() + id.len());
        key.extend_from_slice(self.collection.as_bytes());
        key.extend_from_slice(self.separator.as_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// 共享 hash 布局的父键
    pub fn parent_key(&self) -> Vec<u8> {
        self.collection.as_bytes().to_vec()
    }

    /// 匹配本集合所有实体键的 glob 模式，集合键按字面量匹配
    pub fn all_keys_pattern(&self) -> Vec<u8> {
        let mut pattern = Vec::new();
        for &b in self.collection.as_bytes().iter().chain(self.separator.as_bytes()) {
            if matches!(b, b'*' | b'?' | b'[' | b']' | b'\\') {
                pattern.push(b'\\');
            }
            pattern.push(b);
        }
        pattern.push(b'*');
        pattern
    }

    /// 从实体键还原 id，前缀不符或不是 UTF-8 时返回 `None`
    pub fn id_from_key(&self, key: &[u8]) -> Option<String> {
        let key = std::str::from_utf8(key).ok()?;
        key.strip_prefix(self.collection.as_str())?
            .strip_prefix(self.separator.as_str())
            .map(str::to_string)
    }
}

/// id 不能为空或全是空白
pub fn validate_id(id: &str) -> RepoResult<()> {
    if id.trim().is_empty() {
        return Err(RepoError::InvalidArgument(
            "id must not be empty or blank".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_ids(ids: &[&str]) -> RepoResult<()> {
    ids.iter().try_for_each(|id| validate_id(id))
}
