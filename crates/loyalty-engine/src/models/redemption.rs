//! 礼品与兑换申请实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ParticipantKind, RedemptionStatus};

/// 礼品
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: i64,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    pub points_cost: i64,
    /// 为空表示所有类型参与者可兑换
    #[sqlx(default)]
    pub kind: Option<ParticipantKind>,
    pub is_active: bool,
}

impl Gift {
    /// 参与者类型是否满足礼品的类型限制
    pub fn is_available_for(&self, kind: Option<ParticipantKind>) -> bool {
        match self.kind {
            None => true,
            Some(required) => kind == Some(required),
        }
    }
}

/// 新礼品
#[derive(Debug, Clone)]
pub struct NewGift {
    pub name: String,
    pub description: Option<String>,
    pub points_cost: i64,
    pub kind: Option<ParticipantKind>,
}

/// 兑换申请
///
/// `points_cost` 在申请时锁定，礼品改价不影响历史余额
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRequest {
    pub id: i64,
    pub participant_id: i64,
    pub gift_id: i64,
    pub points_cost: i64,
    pub status: RedemptionStatus,
    pub requested_at: DateTime<Utc>,
    #[sqlx(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    pub user_confirmed: bool,
    pub admin_notes: String,
    pub user_comment: String,
}

/// 一次状态迁移需要写入的字段
///
/// 仓储以 `expected -> next` 做条件更新，旧状态不符时不写入
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub expected: RedemptionStatus,
    pub next: RedemptionStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub user_confirmed: Option<bool>,
    pub admin_notes: Option<String>,
    pub user_comment: Option<String>,
}

impl StatusChange {
    pub fn new(expected: RedemptionStatus, next: RedemptionStatus) -> Self {
        Self {
            expected,
            next,
            processed_at: None,
            confirmed_at: None,
            user_confirmed: None,
            admin_notes: None,
            user_comment: None,
        }
    }
}
