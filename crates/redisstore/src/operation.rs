//! 事务内排队的写操作

/// MULTI 与 EXEC 之间排队的 Redis 写命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KVOperation {
    /// SET key value
    Set { key: Vec<u8>, value: Vec<u8> },
    /// SET key value PX ttl_ms
    SetPx {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_ms: u64,
    },
    /// HSET key field value [field value ...]
    HSet {
        key: Vec<u8>,
        fvs: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// HDEL key field [field ...]
    HDel { key: Vec<u8>, fields: Vec<Vec<u8>> },
    /// DEL key [key ...]
    Del { keys: Vec<Vec<u8>> },
    /// PEXPIRE key ttl_ms
    PExpire { key: Vec<u8>, ttl_ms: u64 },
}

impl KVOperation {
    /// 命令涉及的键（集群模式下用于槽检查）
    pub fn keys(&self) -> Vec<&[u8]> {
        match self {
            KVOperation::Set { key, .. }
            | KVOperation::SetPx { key, .. }
            | KVOperation::HSet { key, .. }
            | KVOperation::HDel { key, .. }
            | KVOperation::PExpire { key, .. } => vec![key.as_slice()],
            KVOperation::Del { keys } => keys.iter().map(|k| k.as_slice()).collect(),
        }
    }

    /// 命令名（日志用）
    pub fn name(&self) -> &'static str {
        match self {
            KVOperation::Set { .. } => "SET",
            KVOperation::SetPx { .. } => "SET PX",
            KVOperation::HSet { .. } => "HSET",
            KVOperation::HDel { .. } => "HDEL",
            KVOperation::Del { .. } => "DEL",
            KVOperation::PExpire { .. } => "PEXPIRE",
        }
    }
}
