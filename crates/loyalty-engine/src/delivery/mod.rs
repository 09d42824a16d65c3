//! 消息投递
//!
//! ## 结果处理
//!
//! - 送达：记录最近联系时间
//! - 永久失败：参与者标记为不可达，之后的任务都不再向其发送，直到显式恢复
//! - 临时失败：只计入失败数，本次任务内不自动重试
//!
//! ## 渠道
//!
//! - `HttpBotChannel`: 机器人 HTTP API
//! - `LoggingChannel`: 只写日志，用于本地开发

mod channel;
mod http;
mod pipeline;
mod worker;

pub use channel::{DeliveryOutcome, LoggingChannel, MessagingChannel};
#[cfg(test)]
pub use channel::MockMessagingChannel;
pub use http::HttpBotChannel;
pub use pipeline::DeliveryPipeline;
pub use worker::DeliveryWorker;
