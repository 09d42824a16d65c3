//! 积分引擎
//!
//! 扫码积分、礼品兑换与批量任务的核心服务。
//!
//! ## 核心功能
//!
//! - **码注册表**：生成带类型前缀的唯一码、短哈希与序列号，按码或哈希解析
//! - **扫码**：每日失败配额、类型校验，并发扫同一个码只有一个成功
//! - **积分账本**：余额由扫码收入减去兑换花费派生，带 TTL 缓存
//! - **礼品兑换**：申请、取消窗口、按角色授权的运营流转与收货确认
//! - **批量任务**：分片链式执行，可取消、可从游标续跑
//! - **消息投递**：限速群发，永久失败的收件人停用
//!
//! ## 模块结构
//!
//! - `models`: 领域模型
//! - `error`: 错误类型
//! - `repository`: PostgreSQL 与内存仓储
//! - `registry`: 码注册表
//! - `scan`: 扫码流程
//! - `ledger`: 积分账本与余额缓存
//! - `redemption`: 兑换状态机
//! - `batch`: 批量任务执行
//! - `delivery`: 消息渠道与投递管道
//! - `clock`: 可替换的时钟

pub mod batch;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod ledger;
pub mod models;
pub mod redemption;
pub mod registry;
pub mod repository;
pub mod scan;

pub use batch::{ChainRunner, ChunkWorker, GenerationWorker, JobWorker, WorkerRegistry};
pub use clock::{Clock, FixedClock, SystemClock};
pub use delivery::{
    DeliveryOutcome, DeliveryPipeline, DeliveryWorker, HttpBotChannel, LoggingChannel,
    MessagingChannel,
};
pub use error::{LoyaltyError, Result};
pub use ledger::{BalanceCache, MemoryBalanceCache, PointsLedger, RedisBalanceCache};
pub use models::*;
pub use redemption::{RedemptionResponse, RedemptionService};
pub use registry::CodeRegistry;
pub use repository::InMemoryStore;
pub use scan::{ScanGovernor, ScanOutcome, ScanRejection};
