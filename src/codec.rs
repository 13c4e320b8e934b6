//! 序列化适配
//!
//! 仓储只和字节打交道，实体与字节之间的转换由调用方提供的编解码器完成：
//! - [`ValueCodec`]：实体 ⇄ 单个值（值布局、共享 hash 布局）
//! - [`HashCodec`]：实体 ⇄ 字段表（hash 布局）
//!
//! 闭包适配器对应文本/二进制两种模式，另外提供基于 serde 的现成实现。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::error::{RepoError, RepoResult};

/// 序列化模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationMode {
    #[default]
    Text,
    Binary,
}

/// 实体 ⇄ 单个值
pub trait ValueCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> RepoResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> RepoResult<T>;
    fn mode(&self) -> SerializationMode;
}

/// 实体 ⇄ 字段表
pub trait HashCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> RepoResult<Vec<(Vec<u8>, Vec<u8>)>>;
    fn decode(&self, fields: Vec<(Vec<u8>, Vec<u8>)>) -> RepoResult<T>;
    fn mode(&self) -> SerializationMode;
}

type EncodeFn<T, V> = Box<dyn Fn(&T) -> anyhow::Result<V> + Send + Sync>;
type DecodeFn<V, T> = Box<dyn Fn(V) -> anyhow::Result<T> + Send + Sync>;

fn utf8(bytes: Vec<u8>) -> RepoResult<String> {
    String::from_utf8(bytes).map_err(RepoError::serialization)
}

/// 文本模式：T ⇄ String
pub struct TextCodec<T> {
    encode: EncodeFn<T, String>,
    decode: Box<dyn Fn(&str) -> anyhow::Result<T> + Send + Sync>,
}

impl<T> TextCodec<T> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> anyhow::Result<String> + Send + Sync + 'static,
        D: Fn(&str) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

impl<T> ValueCodec<T> for TextCodec<T> {
    fn encode(&self, value: &T) -> RepoResult<Vec<u8>> {
        (self.encode)(value)
            .map(String::into_bytes)
            .map_err(RepoError::Serialization)
    }

    fn decode(&self, bytes: &[u8]) -> RepoResult<T> {
        let text = std::str::from_utf8(bytes).map_err(RepoError::serialization)?;
        (self.decode)(text).map_err(RepoError::Serialization)
    }

    fn mode(&self) -> SerializationMode {
        SerializationMode::Text
    }
}

/// 二进制模式：T ⇄ Vec<u8>
pub struct BinaryCodec<T> {
    encode: EncodeFn<T, Vec<u8>>,
    decode: Box<dyn Fn(&[u8]) -> anyhow::Result<T> + Send + Sync>,
}

impl<T> BinaryCodec<T> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
        D: Fn(&[u8]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

impl<T> ValueCodec<T> for BinaryCodec<T> {
    fn encode(&self, value: &T) -> RepoResult<Vec<u8>> {
        (self.encode)(value).map_err(RepoError::Serialization)
    }

    fn decode(&self, bytes: &[u8]) -> RepoResult<T> {
        (self.decode)(bytes).map_err(RepoError::Serialization)
    }

    fn mode(&self) -> SerializationMode {
        SerializationMode::Binary
    }
}

/// 文本模式字段表：T ⇄ HashMap<String, String>
pub struct TextHashCodec<T> {
    encode: EncodeFn<T, HashMap<String, String>>,
    decode: DecodeFn<HashMap<String, String>, T>,
}

impl<T> TextHashCodec<T> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> anyhow::Result<HashMap<String, String>> + Send + Sync + 'static,
        D: Fn(HashMap<String, String>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

impl<T> HashCodec<T> for TextHashCodec<T> {
    fn encode(&self, value: &T) -> RepoResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let fields = (self.encode)(value).map_err(RepoError::Serialization)?;
        Ok(fields
            .into_iter()
            .map(|(f, v)| (f.into_bytes(), v.into_bytes()))
            .collect())
    }

    fn decode(&self, fields: Vec<(Vec<u8>, Vec<u8>)>) -> RepoResult<T> {
        let mut map = HashMap::with_capacity(fields.len());
        for (f, v) in fields {
            map.insert(utf8(f)?, utf8(v)?);
        }
        (self.decode)(map).map_err(RepoError::Serialization)
    }

    fn mode(&self) -> SerializationMode {
        SerializationMode::Text
    }
}

/// 二进制模式字段表：T ⇄ HashMap<Vec<u8>, Vec<u8>>
pub struct BinaryHashCodec<T> {
    encode: EncodeFn<T, HashMap<Vec<u8>, Vec<u8>>>,
    decode: DecodeFn<HashMap<Vec<u8>, Vec<u8>>, T>,
}

impl<T> BinaryHashCodec<T> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> anyhow::Result<HashMap<Vec<u8>, Vec<u8>>> + Send + Sync + 'static,
        D: Fn(HashMap<Vec<u8>, Vec<u8>>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

impl<T> HashCodec<T> for BinaryHashCodec<T> {
    fn encode(&self, value: &T) -> RepoResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let fields = (self.encode)(value).map_err(RepoError::Serialization)?;
        Ok(fields.into_iter().collect())
    }

    fn decode(&self, fields: Vec<(Vec<u8>, Vec<u8>)>) -> RepoResult<T> {
        (self.decode)(fields.into_iter().collect()).map_err(RepoError::Serialization)
    }

    fn mode(&self) -> SerializationMode {
        SerializationMode::Binary
    }
}

// ==================== serde 实现 ====================

/// JSON 文本
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> ValueCodec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> RepoResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(RepoError::serialization)
    }

    fn decode(&self, bytes: &[u8]) -> RepoResult<T> {
        serde_json::from_slice(bytes).map_err(RepoError::serialization)
    }

    fn mode(&self) -> SerializationMode {
        SerializationMode::Text
    }
}

/// bincode 二进制
pub struct BincodeCodec<T>(PhantomData<fn() -> T>);

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> ValueCodec<T> for BincodeCodec<T> {
    fn encode(&self, value: &T) -> RepoResult<Vec<u8>> {
        bincode::serialize(value).map_err(RepoError::serialization)
    }

    fn decode(&self, bytes: &[u8]) -> RepoResult<T> {
        bincode::deserialize(bytes).map_err(RepoError::serialization)
    }

    fn mode(&self) -> SerializationMode {
        SerializationMode::Binary
    }
}

/// JSON 对象按顶层成员拆成字段，字段值是成员的 JSON 文本
pub struct JsonHashCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonHashCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonHashCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> HashCodec<T> for JsonHashCodec<T> {
    fn encode(&self, value: &T) -> RepoResult<Vec<(Vec<u8>, Vec<u8>)>> {
        match serde_json::to_value(value).map_err(RepoError::serialization)? {
            serde_json::Value::Object(members) => Ok(members
                .into_iter()
                .map(|(name, member)| (name.into_bytes(), member.to_string().into_bytes()))
                .collect()),
            other => Err(RepoError::Serialization(anyhow::anyhow!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    fn decode(&self, fields: Vec<(Vec<u8>, Vec<u8>)>) -> RepoResult<T> {
        let mut members = serde_json::Map::with_capacity(fields.len());
        for (name, member) in fields {
            let member: serde_json::Value =
                serde_json::from_slice(&member).map_err(RepoError::serialization)?;
            members.insert(utf8(name)?, member);
        }
        serde_json::from_value(serde_json::Value::Object(members)).map_err(RepoError::serialization)
    }

    fn mode(&self) -> SerializationMode {
        SerializationMode::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        count: u32,
    }

    fn item() -> Item {
        Item {
            name: "widget".to_string(),
            count: 3,
        }
    }

    #[test]
    fn test_serde_codecs() {
        let json = JsonCodec::<Item>::new();
        let bytes = json.encode(&item()).unwrap();
        assert_eq!(json.decode(&bytes).unwrap(), item());
        assert_eq!(json.mode(), SerializationMode::Text);

        let bin = BincodeCodec::<Item>::new();
        let bytes = bin.encode(&item()).unwrap();
        assert_eq!(bin.decode(&bytes).unwrap(), item());
        assert_eq!(bin.mode(), SerializationMode::Binary);

        assert!(matches!(
            json.decode(b"not json"),
            Err(RepoError::Serialization(_))
        ));
    }

    #[test]
    fn test_json_hash_codec() {
        let codec = JsonHashCodec::<Item>::new();
        let mut fields = codec.encode(&item()).unwrap();
        fields.sort();
        assert_eq!(
            fields,
            vec![
                (b"count".to_vec(), b"3".to_vec()),
                (b"name".to_vec(), b"\"widget\"".to_vec()),
            ]
        );
        assert_eq!(codec.decode(fields).unwrap(), item());

        // 非对象无法拆成字段
        let scalar = JsonHashCodec::<u32>::new();
        assert!(scalar.encode(&7).is_err());
    }

    #[test]
    fn test_closure_codecs() {
        let text = TextCodec::<u32>::new(|v| Ok(v.to_string()), |s| Ok(s.parse()?));
        assert_eq!(text.encode(&42).unwrap(), b"42".to_vec());
        assert_eq!(text.decode(b"42").unwrap(), 42);
        assert!(text.decode(b"forty").is_err());
        // 非法 UTF-8
        assert!(matches!(
            text.decode(&[0xff, 0xfe]),
            Err(RepoError::Serialization(_))
        ));

        let hash = TextHashCodec::<Item>::new(
            |i| {
                Ok(HashMap::from([
                    ("name".to_string(), i.name.clone()),
                    ("count".to_string(), i.count.to_string()),
                ]))
            },
            |m| {
                Ok(Item {
                    name: m.get("name").cloned().unwrap_or_default(),
                    count: m.get("count").map(|c| c.parse()).transpose()?.unwrap_or(0),
                })
            },
        );
        let fields = hash.encode(&item()).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(hash.decode(fields).unwrap(), item());
        assert!(hash.decode(vec![(vec![0xff], b"x".to_vec())]).is_err());
    }
}
