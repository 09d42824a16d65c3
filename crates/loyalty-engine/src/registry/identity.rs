//! 标识符、短哈希与序列号的纯函数

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::models::ParticipantKind;

/// 去除易混淆字符（0/O、1/I/L）后的字母表
pub const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// 生成指定长度的随机标识符，带类型前缀
pub fn random_identifier(kind: ParticipantKind, length: usize) -> String {
    let mut rng = rand::rng();
    let body: String = (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}{}", kind.code_prefix(), body)
}

/// 短哈希：SHA-256 前 4 字节的小写十六进制
pub fn short_hash(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    hex::encode(&digest[..4])
}

/// 按类型前缀与定宽零填充格式化序列号
pub fn serial_number(kind: ParticipantKind, value: u64, width: usize) -> String {
    format!("{}{:0width$}", kind.serial_prefix(), value, width = width)
}

/// 解析序列号的数字部分
pub fn parse_serial(serial: &str) -> Option<u64> {
    serial.get(1..)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_uses_alphabet() {
        let id = random_identifier(ParticipantKind::Electrician, 12);
        assert!(id.starts_with("E-"));
        assert_eq!(id.len(), 14);
        assert!(id[2..].bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn test_short_hash_is_stable() {
        let h = short_hash("E-ABCDEFGH");
        assert_eq!(h.len(), 8);
        assert_eq!(h, short_hash("E-ABCDEFGH"));
        assert_ne!(h, short_hash("E-ABCDEFGJ"));
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_serial_format() {
        assert_eq!(serial_number(ParticipantKind::Seller, 42, 7), "D0000042");
        assert_eq!(parse_serial("D0000042"), Some(42));
        assert_eq!(parse_serial("E"), None);
        // 超出宽度时不截断
        assert_eq!(serial_number(ParticipantKind::Electrician, 12345678, 7), "E12345678");
    }
}
