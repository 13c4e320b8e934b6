//! 键到槽的映射（与 Redis Cluster 一致）

use crc::{CRC_16_XMODEM, Crc};

/// Redis Cluster 使用的 CRC16（XMODEM）
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// 槽总数
pub const TOTAL_SLOTS: u16 = 16384;

/// 计算键所在的槽
///
/// 键中包含非空的 `{...}` 时只对第一个花括号内的内容求哈希（hash tag）。
pub fn key_slot(key: &[u8]) -> u16 {
    CRC16.checksum(hash_tag(key)) % TOTAL_SLOTS
}

fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        let rest = &key[open + 1..];
        if let Some(close) = rest.iter().position(|&b| b == b'}') {
            if close > 0 {
                return &rest[..close];
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_slots() {
        assert_eq!(key_slot(b"foo"), 12182);
        assert_eq!(key_slot(b"hello"), 866);
        assert_eq!(CRC16.checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_hash_tag() {
        assert_eq!(
            key_slot(b"{user1000}.following"),
            key_slot(b"{user1000}.followers")
        );
        assert_eq!(key_slot(b"{user1000}.following"), key_slot(b"user1000"));
        // 空的 {} 不算 hash tag
        assert_eq!(hash_tag(b"foo{}{bar}"), b"foo{}{bar}");
        assert_eq!(hash_tag(b"foo{bar}{zap}"), b"bar");
        assert_eq!(hash_tag(b"foo{bar"), b"foo{bar");
    }

    #[test]
    fn test_slot_range() {
        for i in 0..1000 {
            let key = format!("key:{}", i);
            assert!(key_slot(key.as_bytes()) < TOTAL_SLOTS);
        }
    }
}
