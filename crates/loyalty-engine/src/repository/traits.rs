//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    BulkJob, Code, Gift, JobLease, JobRecipient, NewBulkJob, NewCode, NewGift, NewParticipant,
    OutcomeCounts, Participant, ParticipantKind, RecipientFilter, RecipientOutcome,
    RedemptionRequest, StatusChange,
};

/// 写入码的结果
///
/// 唯一约束冲突是正常结果，由码生成器据此决定重试策略
#[derive(Debug, Clone)]
pub enum InsertCodeOutcome {
    Inserted(Code),
    /// 主标识符或短哈希已存在
    DuplicateIdentifier,
    /// 序列号已存在
    DuplicateSerial,
    /// 同一批量任务的同一序号已写入（分片重放）
    DuplicateJobSlot,
}

/// 创建兑换申请的结果
#[derive(Debug, Clone)]
pub enum RequestCreation {
    Created(RedemptionRequest),
    /// 事务内重算的可用积分不足
    Insufficient { available: i64 },
}

/// 码仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeRepository: Send + Sync {
    async fn insert(&self, code: &NewCode) -> Result<InsertCodeOutcome>;
    async fn identifier_exists(&self, code: &str, hash: &str) -> Result<bool>;
    /// 按主标识符或短哈希查找
    async fn find_by_identifier(&self, code: &str, hash: &str) -> Result<Option<Code>>;
    /// 未扫描 -> 已扫描 的条件更新，只有一个并发调用者会得到 true
    async fn mark_scanned(
        &self,
        code_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    async fn last_serial(&self, kind: ParticipantKind) -> Result<Option<String>>;
    /// 参与者已扫描码的积分总和
    async fn sum_rewards_scanned_by(&self, participant_id: i64) -> Result<i64>;
    /// 任务在 [start, end) 区间内已写入的序号
    async fn existing_job_seqs(&self, job_id: i64, start: i64, end: i64) -> Result<Vec<i64>>;
    async fn count_by_job(&self, job_id: i64) -> Result<i64>;
    async fn list_by_job(&self, job_id: i64) -> Result<Vec<Code>>;
}

/// 扫码记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanAttemptRepository: Send + Sync {
    async fn count_failed_since(&self, participant_id: i64, since: DateTime<Utc>) -> Result<i64>;
    async fn record(
        &self,
        participant_id: i64,
        code_id: i64,
        attempted_at: DateTime<Utc>,
        succeeded: bool,
    ) -> Result<()>;
}

/// 参与者仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    async fn create(&self, participant: &NewParticipant) -> Result<Participant>;
    async fn get(&self, id: i64) -> Result<Option<Participant>>;
    async fn get_by_external_id(&self, external_id: i64) -> Result<Option<Participant>>;
    /// 绑定参与者类型：未设置时写入 `kind`；已是 `kind` 时不变。类型不同时返回 false
    async fn claim_kind(&self, id: i64, kind: ParticipantKind) -> Result<bool>;
    async fn update_cached_balance(&self, id: i64, balance: i64) -> Result<()>;
    /// 标记为不可达，已不可达时返回 false
    async fn deactivate(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;
    async fn reactivate(&self, id: i64) -> Result<bool>;
    async fn mark_contacted(&self, id: i64, now: DateTime<Utc>) -> Result<()>;
    /// 满足筛选条件的活跃参与者 ID，按 ID 升序
    async fn list_matching_ids(&self, filter: &RecipientFilter) -> Result<Vec<i64>>;
    async fn top_by_balance(&self, limit: i64) -> Result<Vec<Participant>>;
}

/// 礼品与兑换仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedemptionRepository: Send + Sync {
    async fn create_gift(&self, gift: &NewGift) -> Result<Gift>;
    async fn get_gift(&self, id: i64) -> Result<Option<Gift>>;
    async fn update_gift_cost(&self, id: i64, points_cost: i64) -> Result<()>;

    /// 在同一事务内锁定参与者、重算可用积分并写入申请
    async fn create_request_if_affordable(
        &self,
        participant_id: i64,
        gift_id: i64,
        points_cost: i64,
        now: DateTime<Utc>,
    ) -> Result<RequestCreation>;
    async fn get_request(&self, id: i64) -> Result<Option<RedemptionRequest>>;
    async fn list_requests(&self, participant_id: i64) -> Result<Vec<RedemptionRequest>>;
    /// 非退回状态申请的花费总和
    async fn sum_committed_cost(&self, participant_id: i64) -> Result<i64>;
    /// 以 `change.expected` 为前置条件的状态迁移
    async fn apply_status_change(
        &self,
        id: i64,
        change: &StatusChange,
    ) -> Result<Option<RedemptionRequest>>;
    /// 申请时间不早于 `requested_after` 的待处理申请才会被取消
    async fn cancel_pending(
        &self,
        id: i64,
        participant_id: i64,
        requested_after: DateTime<Utc>,
    ) -> Result<Option<RedemptionRequest>>;
}

/// 批量任务仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 创建任务及其收件人快照（生成任务传空切片）
    async fn create(&self, job: &NewBulkJob, recipients: &[i64]) -> Result<BulkJob>;
    async fn get(&self, id: i64) -> Result<Option<BulkJob>>;
    /// 原子领取最早的待处理任务，置为处理中并写入租约
    async fn claim_next_pending(&self, lease: &JobLease) -> Result<Option<BulkJob>>;
    /// 原子领取一个租约缺失或过期的处理中/收尾中任务（进程重启或实例崩溃后续跑）
    async fn claim_resumable(&self, lease: &JobLease) -> Result<Option<BulkJob>>;
    /// Pending -> Processing
    async fn start(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;
    /// 取得或续期租约：未结束且租约空闲、过期或已归 `lease.owner` 时生效
    async fn acquire_lease(&self, id: i64, lease: &JobLease) -> Result<bool>;
    /// 游标从 `expected_offset` 推进到 `next_offset`，同时写入派生计数并续期租约；
    /// 仅租约持有者可以推进
    async fn advance_cursor(
        &self,
        id: i64,
        lease: &JobLease,
        expected_offset: i64,
        next_offset: i64,
        produced: i64,
        failed: i64,
    ) -> Result<bool>;
    /// 分片内进度检查点
    async fn update_counts(&self, id: i64, produced: i64, failed: i64) -> Result<()>;
    /// Processing -> Finalizing，仅在游标到达末尾且 `owner` 持有租约时生效
    async fn begin_finalize(&self, id: i64, owner: &str) -> Result<bool>;
    /// Finalizing -> Completed
    async fn complete(
        &self,
        id: i64,
        artifact: Option<String>,
        produced: i64,
        failed: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    /// 非终态 -> Failed
    async fn fail(&self, id: i64, message: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn request_cancel(&self, id: i64) -> Result<bool>;
    /// 非终态 -> Cancelled
    async fn mark_cancelled(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;

    async fn list_recipients(&self, job_id: i64, start: i64, end: i64)
    -> Result<Vec<JobRecipient>>;
    async fn record_recipient_outcome(
        &self,
        job_id: i64,
        seq: i64,
        outcome: RecipientOutcome,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn count_outcomes(&self, job_id: i64) -> Result<OutcomeCounts>;
}
