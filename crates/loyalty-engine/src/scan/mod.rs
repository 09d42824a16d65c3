//! 扫码治理
//!
//! 按固定顺序执行检查：每日失败配额 -> 码解析 -> 已扫描 -> 类型匹配 -> 入账。
//! 任何一步拒绝即结束本次请求。

mod governor;

pub use governor::{ScanGovernor, ScanOutcome, ScanRejection, day_start};
