//! 参与者实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::ParticipantKind;

/// 参与者
///
/// `balance` 是反范式缓存，以账本重算结果为准
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    /// 消息渠道中的用户 ID
    pub external_id: i64,
    #[sqlx(default)]
    pub username: Option<String>,
    #[sqlx(default)]
    pub first_name: Option<String>,
    #[sqlx(default)]
    pub last_name: Option<String>,
    #[sqlx(default)]
    pub phone_number: Option<String>,
    #[sqlx(default)]
    pub language: Option<String>,
    #[sqlx(default)]
    pub region: Option<String>,
    /// 首次成功扫码前可能为空
    #[sqlx(default)]
    pub kind: Option<ParticipantKind>,
    pub balance: i64,
    pub is_active: bool,
    #[sqlx(default)]
    pub last_contacted_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    /// 展示名：优先姓名，其次用户名，最后外部 ID
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !full.is_empty() {
            full
        } else if let Some(username) = self.username.as_deref().filter(|s| !s.is_empty()) {
            format!("@{}", username)
        } else {
            self.external_id.to_string()
        }
    }
}

/// 新参与者（由对话前端收集资料后写入）
#[derive(Debug, Clone, Default)]
pub struct NewParticipant {
    pub external_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub language: Option<String>,
    pub region: Option<String>,
    pub kind: Option<ParticipantKind>,
}

/// 排行榜条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub participant_id: i64,
    pub display_name: String,
    pub kind: Option<ParticipantKind>,
    pub balance: i64,
}
