//! 积分引擎错误类型
//!
//! 定义服务层的业务错误和系统错误。扫码拒绝和投递结果属于正常业务结果，
//! 以值的形式返回（见 `ScanOutcome` / `DeliveryOutcome`），不在此列。

use loyalty_shared::error::InfraError;
use thiserror::Error;

/// 积分引擎错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 参与者相关错误 ===
    #[error("参与者不存在: {0}")]
    ParticipantNotFound(i64),

    // === 礼品与兑换相关错误 ===
    #[error("礼品不存在: {0}")]
    GiftNotFound(i64),

    #[error("礼品已下架: {0}")]
    GiftInactive(i64),

    #[error("礼品不适用于该参与者类型: gift_id={gift_id}, kind={kind}")]
    GiftNotAvailableForKind { gift_id: i64, kind: String },

    #[error("积分不足: 需要 {required}, 可用 {available}")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("兑换申请不存在: {0}")]
    RedemptionNotFound(i64),

    #[error("兑换申请不可取消: request_id={request_id}, 原因={reason}")]
    NotCancellable { request_id: i64, reason: String },

    #[error("兑换状态迁移不合法: request_id={request_id}, {from} -> {to}")]
    InvalidTransition {
        request_id: i64,
        from: String,
        to: String,
    },

    #[error("权限不足: role={role}, action={action}")]
    PermissionDenied { role: String, action: String },

    // === 批量任务相关错误 ===
    #[error("批量任务不存在: {0}")]
    JobNotFound(i64),

    #[error("批量任务当前状态不可执行: job_id={job_id}, status={status}")]
    JobNotRunnable { job_id: i64, status: String },

    #[error("批量任务正由其他执行者处理: job_id={job_id}, holder={holder}")]
    JobLeaseHeld { job_id: i64, holder: String },

    // === 码生成相关错误 ===
    #[error("标识符空间已耗尽: 长度上限 {0}")]
    IdentifierSpaceExhausted(usize),

    #[error("序列号冲突重试耗尽: kind={0}")]
    SerialConflict(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("消息渠道错误: {0}")]
    Channel(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("基础设施错误: {0}")]
    Infra(#[from] InfraError),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,
}

/// 积分引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::Cache(_) | Self::Io(_) | Self::ConcurrencyConflict => true,
            Self::Infra(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Cache(_)
                | Self::Channel(_)
                | Self::Io(_)
                | Self::Infra(_)
                | Self::Internal(_)
                | Self::ConcurrencyConflict
        )
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ParticipantNotFound(_) => "PARTICIPANT_NOT_FOUND",
            Self::GiftNotFound(_) => "GIFT_NOT_FOUND",
            Self::GiftInactive(_) => "GIFT_INACTIVE",
            Self::GiftNotAvailableForKind { .. } => "GIFT_NOT_AVAILABLE_FOR_KIND",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::RedemptionNotFound(_) => "REDEMPTION_NOT_FOUND",
            Self::NotCancellable { .. } => "NOT_CANCELLABLE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::JobNotRunnable { .. } => "JOB_NOT_RUNNABLE",
            Self::JobLeaseHeld { .. } => "JOB_LEASE_HELD",
            Self::IdentifierSpaceExhausted(_) => "IDENTIFIER_SPACE_EXHAUSTED",
            Self::SerialConflict(_) => "SERIAL_CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Channel(_) => "CHANNEL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Infra(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
        }
    }
}
