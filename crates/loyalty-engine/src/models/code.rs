//! 码与扫码记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::ParticipantKind;

/// 一次性积分码
///
/// `is_scanned = true` 时 `scanned_by` 与 `scanned_at` 必然已设置，且此后不可变
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    pub id: i64,
    /// 主标识符（带类型前缀，大写）
    pub code: String,
    /// 短哈希（小写十六进制）
    pub hash: String,
    pub serial_number: String,
    pub kind: ParticipantKind,
    pub reward_value: i64,
    pub is_scanned: bool,
    #[sqlx(default)]
    pub scanned_by: Option<i64>,
    #[sqlx(default)]
    pub scanned_at: Option<DateTime<Utc>>,
    /// 由批量任务生成时的任务 ID 与序号
    #[sqlx(default)]
    pub job_id: Option<i64>,
    #[sqlx(default)]
    pub job_seq: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCode {
    pub code: String,
    pub hash: String,
    pub serial_number: String,
    pub kind: ParticipantKind,
    pub reward_value: i64,
    pub job_id: Option<i64>,
    pub job_seq: Option<i64>,
}

/// 扫码尝试记录
///
/// 每次尝试一行，既是审计流水也是每日失败配额的计数依据
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScanAttempt {
    pub id: i64,
    pub participant_id: i64,
    pub code_id: i64,
    pub attempted_at: DateTime<Utc>,
    pub succeeded: bool,
}
