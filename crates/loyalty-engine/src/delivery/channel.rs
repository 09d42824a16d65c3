//! 消息渠道 trait 与发送结果

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

/// 单次发送的结果
///
/// 发送失败是正常结果而不是错误，调用方据此决定是否标记收件人不可达
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// 收件人屏蔽或不存在，此后不再向其发送
    PermanentFailure(String),
    /// 限流、服务端错误或网络错误，本次计为失败
    TransientFailure(String),
}

impl DeliveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::PermanentFailure(_) => "permanent_failure",
            Self::TransientFailure(_) => "transient_failure",
        }
    }
}

/// 消息渠道
///
/// `recipient` 为参与者在外部渠道的 ID，`attachment` 为图片 URL 或渠道文件 ID
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        recipient: i64,
        text: &str,
        attachment: Option<String>,
    ) -> Result<DeliveryOutcome>;
}

/// 只写日志的渠道，未配置机器人令牌时使用
#[derive(Debug, Default)]
pub struct LoggingChannel;

#[async_trait]
impl MessagingChannel for LoggingChannel {
    fn name(&self) -> &str {
        "logging"
    }

    async fn send(
        &self,
        recipient: i64,
        text: &str,
        attachment: Option<String>,
    ) -> Result<DeliveryOutcome> {
        info!(
            recipient,
            chars = text.chars().count(),
            attachment = attachment.as_deref().unwrap_or(""),
            "消息已记录（未真实发送）"
        );
        Ok(DeliveryOutcome::Delivered)
    }
}
