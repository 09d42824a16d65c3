//! 批量任务实体
//!
//! 一个批量任务被切分为若干分片顺序执行，分片之间只通过持久化的
//! `next_offset` 游标传递续跑状态，每个分片据此重新推导自己的区间。

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{JobKind, JobStatus, ParticipantKind, RecipientOutcome};
use super::participant::Participant;
use crate::error::Result;

/// 批量任务
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BulkJob {
    pub id: i64,
    pub kind: JobKind,
    /// 任务参数（`JobPayload` 的 JSON 形式）
    pub payload: serde_json::Value,
    pub total_units: i64,
    pub chunk_size: i64,
    pub status: JobStatus,
    /// 下一个待执行分片的起始偏移
    pub next_offset: i64,
    /// 已生成的码数 / 已送达的消息数
    pub produced_count: i64,
    pub failure_count: i64,
    pub cancel_requested: bool,
    /// 结果产物引用（码清单文件路径）
    #[sqlx(default)]
    pub artifact: Option<String>,
    #[sqlx(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// 当前持有执行租约的执行者
    #[sqlx(default)]
    pub claimed_by: Option<String>,
    #[sqlx(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl BulkJob {
    pub fn payload(&self) -> Result<JobPayload> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// 分片总数：ceil(total / chunk)
    pub fn chunk_count(&self) -> i64 {
        if self.total_units <= 0 || self.chunk_size <= 0 {
            return 0;
        }
        (self.total_units + self.chunk_size - 1) / self.chunk_size
    }

    /// 从偏移推导分片区间，末片可能不足 chunk_size
    pub fn chunk_range(&self, offset: i64) -> Range<i64> {
        let end = (offset + self.chunk_size).min(self.total_units);
        offset..end.max(offset)
    }

    /// 游标是否已越过全部单元
    pub fn is_exhausted(&self, offset: i64) -> bool {
        offset >= self.total_units
    }

    /// 无人持有租约，或租约已过期
    pub fn is_unleased(&self, now: DateTime<Utc>) -> bool {
        match (&self.claimed_by, self.lease_expires_at) {
            (Some(_), Some(expires_at)) => expires_at <= now,
            _ => true,
        }
    }

    /// `owner` 能否取得（或续期）租约
    pub fn lease_available_to(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.claimed_by.as_deref() == Some(owner) || self.is_unleased(now)
    }
}

/// 执行租约
///
/// 同一任务同一时刻只有一个执行者持有未过期的租约，
/// 推进游标时续期；执行者崩溃后租约过期，其他实例才能接管。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLease {
    pub owner: String,
    pub now: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// 待创建的批量任务
#[derive(Debug, Clone)]
pub struct NewBulkJob {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub total_units: i64,
    pub chunk_size: i64,
}

/// 批量任务参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPayload {
    /// 批量生成码
    Generation {
        kind: ParticipantKind,
        /// 为空时使用该类型的默认积分
        #[serde(default)]
        reward_value: Option<i64>,
        quantity: u64,
    },
    /// 批量消息投递
    Delivery {
        text: String,
        /// 图片等附件的 URL 或渠道文件 ID
        #[serde(default)]
        attachment: Option<String>,
        #[serde(default)]
        filter: RecipientFilter,
    },
}

impl JobPayload {
    pub fn job_kind(&self) -> JobKind {
        match self {
            Self::Generation { .. } => JobKind::CodeGeneration,
            Self::Delivery { .. } => JobKind::MessageDelivery,
        }
    }
}

/// 群发收件人筛选条件，只会命中活跃参与者
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientFilter {
    #[serde(default)]
    pub kind: Option<ParticipantKind>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl RecipientFilter {
    pub fn matches(&self, participant: &Participant) -> bool {
        participant.is_active
            && self.kind.is_none_or(|k| participant.kind == Some(k))
            && self
                .language
                .as_deref()
                .is_none_or(|l| participant.language.as_deref() == Some(l))
            && self
                .region
                .as_deref()
                .is_none_or(|r| participant.region.as_deref() == Some(r))
    }
}

/// 分片续跑令牌，由上一个分片产出、下一个分片消费
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkContinuation {
    pub job_id: i64,
    pub next_offset: i64,
}

/// 投递任务的收件人快照（提交时固定）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct JobRecipient {
    pub job_id: i64,
    pub seq: i64,
    pub participant_id: i64,
    #[sqlx(default)]
    pub outcome: Option<RecipientOutcome>,
    #[sqlx(default)]
    pub error: Option<String>,
    #[sqlx(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

/// 按结果汇总的收件人数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub delivered: i64,
    pub permanent_failure: i64,
    pub transient_failure: i64,
    pub skipped: i64,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: RecipientOutcome, n: i64) {
        match outcome {
            RecipientOutcome::Delivered => self.delivered += n,
            RecipientOutcome::PermanentFailure => self.permanent_failure += n,
            RecipientOutcome::TransientFailure => self.transient_failure += n,
            RecipientOutcome::Skipped => self.skipped += n,
        }
    }

    /// 计入任务失败数的部分
    pub fn failed(&self) -> i64 {
        self.permanent_failure + self.transient_failure + self.skipped
    }
}
