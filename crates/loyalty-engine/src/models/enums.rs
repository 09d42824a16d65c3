//! 积分引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;

use serde::{Deserialize, Serialize};

/// 参与者类型
///
/// 码与参与者都带类型，扫码时两者必须一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantKind {
    /// 电工
    Electrician,
    /// 经销商
    Seller,
}

impl ParticipantKind {
    pub const ALL: [ParticipantKind; 2] = [Self::Electrician, Self::Seller];

    /// 码标识符前缀
    pub fn code_prefix(&self) -> &'static str {
        match self {
            Self::Electrician => "E-",
            Self::Seller => "D-",
        }
    }

    /// 序列号前缀字母
    pub fn serial_prefix(&self) -> char {
        match self {
            Self::Electrician => 'E',
            Self::Seller => 'D',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Electrician => "ELECTRICIAN",
            Self::Seller => "SELLER",
        }
    }
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 兑换申请状态
///
/// 主流程 pending -> approved -> sent -> completed，
/// 旁路出口 rejected / not_received / cancelled_by_user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionStatus {
    #[default]
    Pending,
    Approved,
    Sent,
    Completed,
    Rejected,
    NotReceived,
    CancelledByUser,
}

impl RedemptionStatus {
    /// 退回状态：花费不计入已承诺支出，相当于退款
    pub const RETURNED: [RedemptionStatus; 3] =
        [Self::Rejected, Self::NotReceived, Self::CancelledByUser];

    pub fn is_returned(&self) -> bool {
        Self::RETURNED.contains(self)
    }

    /// 终态不再允许任何迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed) || self.is_returned()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Sent => "SENT",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::NotReceived => "NOT_RECEIVED",
            Self::CancelledByUser => "CANCELLED_BY_USER",
        }
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运营角色
///
/// 权限逐级包含：Agent < CallCenter < Administrator
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorRole {
    /// 配送代理，仅能确认送达
    Agent,
    /// 客服中心
    CallCenter,
    /// 管理员
    Administrator,
}

impl OperatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "AGENT",
            Self::CallCenter => "CALL_CENTER",
            Self::Administrator => "ADMINISTRATOR",
        }
    }
}

/// 批量任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// 批量生成码
    CodeGeneration,
    /// 批量消息投递
    MessageDelivery,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeGeneration => "CODE_GENERATION",
            Self::MessageDelivery => "MESSAGE_DELIVERY",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 批量任务状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    /// 最后一个分片已完成，收尾步骤执行中（只允许进入一次）
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// 对外展示的状态，收尾阶段仍视为处理中
    pub fn reported(&self) -> JobStatus {
        match self {
            Self::Finalizing => Self::Processing,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Finalizing => "FINALIZING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个收件人的投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientOutcome {
    Delivered,
    PermanentFailure,
    TransientFailure,
    /// 发送前已被标记为不可达，未发送
    Skipped,
}

impl RecipientOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "DELIVERED",
            Self::PermanentFailure => "PERMANENT_FAILURE",
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::Skipped => "SKIPPED",
        }
    }
}
