use redis_repo::{BinaryHashCodec, BincodeCodec, JsonCodec, TextCodec, TextHashCodec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- 测试实体 ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub total: u32,
}

impl Order {
    pub fn new(total: u32) -> Self {
        Self { total }
    }

    pub fn with_total(&self, total: u32) -> Self {
        Self { total }
    }

    pub fn incremented(self) -> Self {
        Self {
            total: self.total + 1,
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

// --- 编解码器 ---

/// 文本模式：`{"total":10}`
pub fn text_codec() -> TextCodec<Order> {
    TextCodec::new(
        |o: &Order| Ok(serde_json::to_string(o)?),
        |s: &str| Ok(serde_json::from_str(s)?),
    )
}

pub fn json_codec() -> JsonCodec<Order> {
    JsonCodec::new()
}

pub fn binary_codec() -> BincodeCodec<Order> {
    BincodeCodec::new()
}

/// 字段表：`total -> "10"`
pub fn hash_codec() -> TextHashCodec<Order> {
    TextHashCodec::new(
        |o: &Order| Ok(HashMap::from([("total".to_string(), o.total.to_string())])),
        |fields: HashMap<String, String>| {
            let total = fields
                .get("total")
                .ok_or_else(|| anyhow::anyhow!("missing total field"))?
                .parse()?;
            Ok(Order { total })
        },
    )
}

/// 二进制字段表：`total -> u32 大端`
pub fn binary_hash_codec() -> BinaryHashCodec<Order> {
    BinaryHashCodec::new(
        |o: &Order| Ok(HashMap::from([(b"total".to_vec(), o.total.to_be_bytes().to_vec())])),
        |fields: HashMap<Vec<u8>, Vec<u8>>| {
            let raw = fields
                .get(b"total".as_slice())
                .ok_or_else(|| anyhow::anyhow!("missing total field"))?;
            let bytes: [u8; 4] = raw.as_slice().try_into()?;
            Ok(Order {
                total: u32::from_be_bytes(bytes),
            })
        },
    )
}
