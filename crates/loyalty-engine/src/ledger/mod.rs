//! 积分账本
//!
//! 余额是账本事件的纯函数：已扫描码的积分之和减去未退回兑换申请的花费，
//! 下限为 0。计算结果带 TTL 缓存，写路径显式失效。

mod cache;
mod service;

pub use cache::{BalanceCache, MemoryBalanceCache, RedisBalanceCache};
pub use service::PointsLedger;
