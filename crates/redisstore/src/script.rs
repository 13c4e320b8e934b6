//! 比较并交换（CAS）脚本目录
//!
//! 仓储用这些脚本做原子的条件更新/删除：一次上传（SCRIPT LOAD），之后按 SHA1 摘要执行。
//! 每个脚本在条件满足时返回 1，否则返回 0。
//!
//! 键/参数约定：
//! - 值脚本：`KEYS[1]` = 实体键，`ARGV[1]` = 期望值，`ARGV[2]` = 新值
//! - 字段脚本：`KEYS[1]` = 父键，`ARGV[1]` = 字段（实体 id），`ARGV[2]` = 期望值，`ARGV[3]` = 新值

use sha1::{Digest, Sha1};

const VALUE_UPDATE_IF_IS: &str = "\
local current = redis.call('GET', KEYS[1])
if current and current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0";

const VALUE_UPDATE_IF_IS_NOT: &str = "\
local current = redis.call('GET', KEYS[1])
if current and current ~= ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0";

const VALUE_DELETE_IF_IS: &str = "\
local current = redis.call('GET', KEYS[1])
if current and current == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0";

const VALUE_DELETE_IF_IS_NOT: &str = "\
local current = redis.call('GET', KEYS[1])
if current and current ~= ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0";

const FIELD_UPDATE_IF_IS: &str = "\
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current and current == ARGV[2] then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
  return 1
end
return 0";

const FIELD_UPDATE_IF_IS_NOT: &str = "\
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current and current ~= ARGV[2] then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
  return 1
end
return 0";

const FIELD_DELETE_IF_IS: &str = "\
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current and current == ARGV[2] then
  redis.call('HDEL', KEYS[1], ARGV[1])
  return 1
end
return 0";

const FIELD_DELETE_IF_IS_NOT: &str = "\
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current and current ~= ARGV[2] then
  redis.call('HDEL', KEYS[1], ARGV[1])
  return 1
end
return 0";

/// CAS 脚本变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasScript {
    ValueUpdateIfIs,
    ValueUpdateIfIsNot,
    ValueDeleteIfIs,
    ValueDeleteIfIsNot,
    FieldUpdateIfIs,
    FieldUpdateIfIsNot,
    FieldDeleteIfIs,
    FieldDeleteIfIsNot,
}

impl CasScript {
    pub const ALL: [CasScript; 8] = [
        CasScript::ValueUpdateIfIs,
        CasScript::ValueUpdateIfIsNot,
        CasScript::ValueDeleteIfIs,
        CasScript::ValueDeleteIfIsNot,
        CasScript::FieldUpdateIfIs,
        CasScript::FieldUpdateIfIsNot,
        CasScript::FieldDeleteIfIs,
        CasScript::FieldDeleteIfIsNot,
    ];

    /// 脚本源码（Lua）
    pub fn body(self) -> &'static str {
        match self {
            CasScript::ValueUpdateIfIs => VALUE_UPDATE_IF_IS,
            CasScript::ValueUpdateIfIsNot => VALUE_UPDATE_IF_IS_NOT,
            CasScript::ValueDeleteIfIs => VALUE_DELETE_IF_IS,
            CasScript::ValueDeleteIfIsNot => VALUE_DELETE_IF_IS_NOT,
            CasScript::FieldUpdateIfIs => FIELD_UPDATE_IF_IS,
            CasScript::FieldUpdateIfIsNot => FIELD_UPDATE_IF_IS_NOT,
            CasScript::FieldDeleteIfIs => FIELD_DELETE_IF_IS,
            CasScript::FieldDeleteIfIsNot => FIELD_DELETE_IF_IS_NOT,
        }
    }

    /// 与 SCRIPT LOAD 返回值一致的 SHA1 摘要
    pub fn digest(self) -> String {
        sha1_hex(self.body())
    }

    /// 根据源码反查变体（内存存储执行脚本时使用）
    pub fn from_body(body: &str) -> Option<CasScript> {
        Self::ALL.into_iter().find(|s| s.body() == body)
    }

    /// 是否作用于共享 hash 的字段
    pub fn is_field(self) -> bool {
        matches!(
            self,
            CasScript::FieldUpdateIfIs
                | CasScript::FieldUpdateIfIsNot
                | CasScript::FieldDeleteIfIs
                | CasScript::FieldDeleteIfIsNot
        )
    }

    /// 条件为"相等"（否则为"不相等"）
    pub fn fires_on_equal(self) -> bool {
        matches!(
            self,
            CasScript::ValueUpdateIfIs
                | CasScript::ValueDeleteIfIs
                | CasScript::FieldUpdateIfIs
                | CasScript::FieldDeleteIfIs
        )
    }

    /// 动作为删除（否则为写入新值）
    pub fn is_delete(self) -> bool {
        matches!(
            self,
            CasScript::ValueDeleteIfIs
                | CasScript::ValueDeleteIfIsNot
                | CasScript::FieldDeleteIfIs
                | CasScript::FieldDeleteIfIsNot
        )
    }

    /// 条件是否满足：当前值存在，且与期望值相等（或不相等）
    pub fn guard(self, current: Option<&[u8]>, expected: &[u8]) -> bool {
        match current {
            Some(current) => (current == expected) == self.fires_on_equal(),
            None => false,
        }
    }
}

/// SHA1 十六进制摘要
pub fn sha1_hex(body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sha1_hex() {
        assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_digests_are_distinct() {
        let digests: HashSet<String> = CasScript::ALL.iter().map(|s| s.digest()).collect();
        assert_eq!(digests.len(), CasScript::ALL.len());
        for s in CasScript::ALL {
            assert_eq!(s.digest().len(), 40);
            assert_eq!(CasScript::from_body(s.body()), Some(s));
        }
        assert_eq!(CasScript::from_body("return 1"), None);
    }

    #[test]
    fn test_guard() {
        assert!(CasScript::ValueUpdateIfIs.guard(Some(b"a"), b"a"));
        assert!(!CasScript::ValueUpdateIfIs.guard(Some(b"b"), b"a"));
        assert!(!CasScript::ValueUpdateIfIs.guard(None, b"a"));

        assert!(CasScript::FieldDeleteIfIsNot.guard(Some(b"b"), b"a"));
        assert!(!CasScript::FieldDeleteIfIsNot.guard(Some(b"a"), b"a"));
        // 不存在时"不相等"也不触发
        assert!(!CasScript::FieldDeleteIfIsNot.guard(None, b"a"));
    }
}
