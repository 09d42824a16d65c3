//! 码注册表
//!
//! 负责生成无碰撞的标识符与序列号，并持有 未扫描 -> 已扫描 的唯一迁移。

mod identity;
mod service;

pub use identity::{ALPHABET, random_identifier, serial_number, short_hash};
pub use service::CodeRegistry;
