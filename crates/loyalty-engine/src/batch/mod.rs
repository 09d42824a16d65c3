//! 批量任务链式执行
//!
//! 大任务（批量生成码、批量投递消息）被切成固定大小的分片顺序执行，
//! 每个分片执行完毕后持久化游标，下一分片从游标重新推导自己的区间。
//! 分片必须可重放：重复执行同一分片不会产生重复单元。
//!
//! ## 模块结构
//!
//! - `worker`: 分片执行器 trait 与注册表
//! - `runner`: 任务提交、状态查询、取消与链式驱动
//! - `generation`: 批量生成码的分片执行器
//! - `job_worker`: 轮询领取待处理任务的后台 Worker

mod generation;
mod job_worker;
mod runner;
mod worker;

pub use generation::GenerationWorker;
pub use job_worker::JobWorker;
pub use runner::ChainRunner;
pub use worker::{ChunkWorker, JobProgress, WorkerRegistry};
