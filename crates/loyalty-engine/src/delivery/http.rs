//! 机器人 HTTP API 渠道
//!
//! 纯文本走 `sendMessage`，带附件走 `sendPhoto`（附件作为 photo，正文作为 caption）。
//! 按 HTTP 状态码分类结果：
//!
//! - 2xx: 已送达
//! - 403: 收件人屏蔽了机器人或已注销，永久失败
//! - 400: 描述指向收件人本身（会话不存在、账号已注销等）时永久失败，
//!   其余 400（消息格式、附件无效等）属于本次请求的问题，临时失败
//! - 其他（429、5xx、鉴权错误、网络错误）: 临时失败

use std::time::Duration;

use async_trait::async_trait;
use loyalty_shared::config::DeliveryConfig;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::channel::{DeliveryOutcome, MessagingChannel};
use crate::error::{LoyaltyError, Result};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    description: Option<String>,
}

/// 机器人 HTTP API 渠道
pub struct HttpBotChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBotChannel {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LoyaltyError::Channel("未配置机器人令牌".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()
            .map_err(|e| LoyaltyError::Channel(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_base_url.trim_end_matches('/'), token),
        })
    }
}

/// 表示收件人不可达的 400 错误描述片段（小写）
const UNREACHABLE_RECIPIENT_MARKERS: &[&str] = &[
    "chat not found",
    "user not found",
    "user is deactivated",
    "bot was blocked",
    "peer_id_invalid",
    "have no rights to send",
];

fn names_unreachable_recipient(description: &str) -> bool {
    let description = description.to_lowercase();
    UNREACHABLE_RECIPIENT_MARKERS
        .iter()
        .any(|marker| description.contains(marker))
}

/// 按状态码与错误描述分类发送结果
pub(crate) fn classify(status: StatusCode, description: Option<String>) -> DeliveryOutcome {
    if status.is_success() {
        return DeliveryOutcome::Delivered;
    }

    let permanent = match status {
        StatusCode::FORBIDDEN => true,
        StatusCode::BAD_REQUEST => description
            .as_deref()
            .is_some_and(names_unreachable_recipient),
        _ => false,
    };

    let reason = description.unwrap_or_else(|| status.to_string());
    if permanent {
        DeliveryOutcome::PermanentFailure(reason)
    } else {
        DeliveryOutcome::TransientFailure(reason)
    }
}

#[async_trait]
impl MessagingChannel for HttpBotChannel {
    fn name(&self) -> &str {
        "http_bot"
    }

    async fn send(
        &self,
        recipient: i64,
        text: &str,
        attachment: Option<String>,
    ) -> Result<DeliveryOutcome> {
        let (method, body) = match attachment {
            Some(photo) => (
                "sendPhoto",
                json!({ "chat_id": recipient, "photo": photo, "caption": text }),
            ),
            None => ("sendMessage", json!({ "chat_id": recipient, "text": text })),
        };

        let response = match self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(recipient, error = %e, "消息发送请求失败");
                return Ok(DeliveryOutcome::TransientFailure(e.to_string()));
            }
        };

        let status = response.status();
        let description = response
            .json::<ApiResponse>()
            .await
            .ok()
            .and_then(|r| r.description);
        let outcome = classify(status, description);

        debug!(recipient, method, status = status.as_u16(), outcome = outcome.label(), "消息发送完成");
        Ok(outcome)
    }
}
