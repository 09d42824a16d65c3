//! 批量任务链式驱动
//!
//! ## 执行流程
//!
//! 1. 提交：校验参数，投递任务在同一事务内固定收件人快照
//! 2. 每个分片：检查取消标记 -> 按游标推导区间 -> 执行（可重试错误退避重试）
//!    -> 派生计数并以条件更新推进游标
//! 3. 游标到达末尾：`Processing -> Finalizing` 条件更新保证收尾只进入一次，
//!    产出为零则任务失败，否则写入产物并完成
//!
//! 执行任务前先取得租约，每个分片开始前续期；推进游标和进入收尾都要求仍持有租约。
//! 同一进程内同一任务只会有一个 `run` 在执行。

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use loyalty_shared::config::BatchConfig;
use loyalty_shared::observability::metrics;
use loyalty_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{error, info, instrument, warn};

use super::worker::{ChunkWorker, WorkerRegistry};
use crate::clock::Clock;
use crate::error::{LoyaltyError, Result};
use crate::models::{BulkJob, ChunkContinuation, JobLease, JobPayload, JobStatus, NewBulkJob};
use crate::repository::{JobRepository, ParticipantRepository};

/// 批量任务链式执行器
pub struct ChainRunner {
    jobs: Arc<dyn JobRepository>,
    participants: Arc<dyn ParticipantRepository>,
    workers: WorkerRegistry,
    clock: Arc<dyn Clock>,
    config: BatchConfig,
    retry: RetryPolicy,
    /// 租约持有者标识
    owner: String,
    lease_ttl: chrono::Duration,
    /// 本进程正在执行的任务
    active: DashSet<i64>,
}

/// 离开作用域时把任务移出执行集合
struct ActiveJob<'a> {
    active: &'a DashSet<i64>,
    job_id: i64,
}

impl<'a> ActiveJob<'a> {
    fn enter(active: &'a DashSet<i64>, job_id: i64) -> Option<Self> {
        active.insert(job_id).then_some(Self { active, job_id })
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.job_id);
    }
}

impl ChainRunner {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        participants: Arc<dyn ParticipantRepository>,
        workers: WorkerRegistry,
        clock: Arc<dyn Clock>,
        config: BatchConfig,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.chunk_max_retries,
            Duration::from_millis(config.chunk_retry_initial_delay_ms),
        );
        let owner = config
            .instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("runner-{:016x}", rand::random::<u64>()));
        let lease_ttl = chrono::Duration::seconds(config.lease_seconds.max(1) as i64);
        Self {
            jobs,
            participants,
            workers,
            clock,
            config,
            retry,
            owner,
            lease_ttl,
            active: DashSet::new(),
        }
    }

    /// 租约持有者标识
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 以当前时间签发一份本执行者的租约
    pub fn lease(&self) -> JobLease {
        let now = self.clock.now();
        JobLease {
            owner: self.owner.clone(),
            now,
            expires_at: now + self.lease_ttl,
        }
    }

    /// 提交批量任务，返回处于 Pending 的任务
    ///
    /// 投递任务没有匹配收件人时直接以失败结束
    #[instrument(skip(self, payload), fields(kind = %payload.job_kind()))]
    pub async fn submit(&self, payload: JobPayload) -> Result<BulkJob> {
        let kind = payload.job_kind();
        if !self.workers.contains(kind) {
            return Err(LoyaltyError::Internal(format!("未注册分片执行器: {}", kind)));
        }

        let (total_units, chunk_size, recipients) = match &payload {
            JobPayload::Generation {
                quantity,
                reward_value,
                ..
            } => {
                if *quantity == 0 {
                    return Err(LoyaltyError::Validation("生成数量必须大于 0".into()));
                }
                if reward_value.is_some_and(|r| r < 0) {
                    return Err(LoyaltyError::Validation("积分不能为负".into()));
                }
                (*quantity as i64, self.config.generation_chunk_size, Vec::new())
            }
            JobPayload::Delivery { text, filter, .. } => {
                if text.trim().is_empty() {
                    return Err(LoyaltyError::Validation("消息内容不能为空".into()));
                }
                let ids = self.participants.list_matching_ids(filter).await?;
                (ids.len() as i64, self.config.delivery_chunk_size, ids)
            }
        };

        let job = self
            .jobs
            .create(
                &NewBulkJob {
                    kind,
                    payload: serde_json::to_value(&payload)?,
                    total_units,
                    chunk_size: chunk_size.max(1) as i64,
                },
                &recipients,
            )
            .await?;

        info!(
            job_id = job.id,
            total_units,
            chunks = job.chunk_count(),
            "批量任务已提交"
        );

        if total_units == 0 {
            self.jobs
                .fail(job.id, "没有匹配的收件人", self.clock.now())
                .await?;
            metrics::record_bulk_job(kind.as_str(), "failed");
            warn!(job_id = job.id, "批量任务没有可处理单元，直接失败");
            return self.status(job.id).await;
        }

        Ok(job)
    }

    /// 查询任务状态与计数，收尾中对外报告为处理中
    pub async fn status(&self, job_id: i64) -> Result<BulkJob> {
        let mut job = self.load(job_id).await?;
        job.status = job.status.reported();
        Ok(job)
    }

    async fn load(&self, job_id: i64) -> Result<BulkJob> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or(LoyaltyError::JobNotFound(job_id))
    }

    /// 请求取消：Pending 任务立即取消，运行中的任务在下一个分片前生效
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: i64) -> Result<BulkJob> {
        let job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Err(LoyaltyError::JobNotRunnable {
                job_id,
                status: job.status.to_string(),
            });
        }

        self.jobs.request_cancel(job_id).await?;
        if job.status == JobStatus::Pending
            && self.jobs.mark_cancelled(job_id, self.clock.now()).await?
        {
            metrics::record_bulk_job(job.kind.as_str(), "cancelled");
            info!(job_id, "待处理任务已取消");
        }

        self.status(job_id).await
    }

    /// 驱动任务直到终态
    ///
    /// 先取得租约；Pending 任务置为处理中，处理中或收尾中的任务从持久化游标续跑。
    /// 租约由其他执行者持有且未过期时返回 `JobLeaseHeld`
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn run(&self, job_id: i64) -> Result<BulkJob> {
        let Some(_active) = ActiveJob::enter(&self.active, job_id) else {
            return Err(LoyaltyError::JobLeaseHeld {
                job_id,
                holder: self.owner.clone(),
            });
        };

        let job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Err(LoyaltyError::JobNotRunnable {
                job_id,
                status: job.status.to_string(),
            });
        }

        if !self.jobs.acquire_lease(job_id, &self.lease()).await? {
            let current = self.load(job_id).await?;
            if current.status.is_terminal() {
                return Err(LoyaltyError::JobNotRunnable {
                    job_id,
                    status: current.status.to_string(),
                });
            }
            return Err(LoyaltyError::JobLeaseHeld {
                job_id,
                holder: current.claimed_by.unwrap_or_default(),
            });
        }

        if job.status == JobStatus::Pending {
            self.jobs.start(job_id, self.clock.now()).await?;
        } else {
            info!(job_id, next_offset = job.next_offset, "从游标续跑任务");
        }

        let mut continuation = Some(ChunkContinuation {
            job_id,
            next_offset: job.next_offset,
        });
        while let Some(current) = continuation {
            continuation = self.run_chunk(current).await?;
        }

        self.status(job_id).await
    }

    /// 执行一个分片，返回下一分片的续跑令牌；任务结束时返回 `None`
    pub async fn run_chunk(
        &self,
        continuation: ChunkContinuation,
    ) -> Result<Option<ChunkContinuation>> {
        let job = self.load(continuation.job_id).await?;
        let worker = self.worker_for(&job)?;

        if job.status.is_terminal() || job.status == JobStatus::Pending {
            return Ok(None);
        }

        // 续期租约；已被其他执行者接管时停止
        if !self.jobs.acquire_lease(job.id, &self.lease()).await? {
            warn!(
                job_id = job.id,
                holder = job.claimed_by.as_deref().unwrap_or(""),
                "租约由其他执行者持有，停止执行"
            );
            return Ok(None);
        }

        if job.cancel_requested {
            if self.jobs.mark_cancelled(job.id, self.clock.now()).await? {
                metrics::record_bulk_job(job.kind.as_str(), "cancelled");
                info!(job_id = job.id, next_offset = job.next_offset, "任务已在分片边界取消");
            }
            return Ok(None);
        }

        if job.status == JobStatus::Finalizing || job.is_exhausted(job.next_offset) {
            self.finalize(&job, worker.as_ref()).await?;
            return Ok(None);
        }

        // 续跑令牌落后于持久化游标时以游标为准
        if continuation.next_offset != job.next_offset {
            warn!(
                job_id = job.id,
                token_offset = continuation.next_offset,
                persisted_offset = job.next_offset,
                "续跑令牌与游标不一致，按游标继续"
            );
        }

        let offset = job.next_offset;
        let range = job.chunk_range(offset);
        let started = Instant::now();

        let executed = retry_with_policy(
            &self.retry,
            "bulk_chunk",
            LoyaltyError::is_retryable,
            || worker.execute(&job, range.start, range.end),
        )
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        if let Err(e) = executed {
            metrics::record_bulk_chunk(job.kind.as_str(), "failed", elapsed);
            error!(
                job_id = job.id,
                start = range.start,
                end = range.end,
                error = %e,
                "分片执行失败，任务终止"
            );
            let message = format!("分片 [{}, {}) 执行失败: {}", range.start, range.end, e);
            if self.jobs.fail(job.id, &message, self.clock.now()).await? {
                metrics::record_bulk_job(job.kind.as_str(), "failed");
            }
            return Ok(None);
        }

        let progress = worker.progress(&job).await?;
        let advanced = self
            .jobs
            .advance_cursor(
                job.id,
                &self.lease(),
                offset,
                range.end,
                progress.produced,
                progress.failed,
            )
            .await?;
        metrics::record_bulk_chunk(job.kind.as_str(), "success", elapsed);

        if !advanced {
            warn!(job_id = job.id, offset, "租约已失效或游标已被推进，停止执行");
            return Ok(None);
        }

        info!(
            job_id = job.id,
            start = range.start,
            end = range.end,
            produced = progress.produced,
            failed = progress.failed,
            "分片执行完成"
        );

        Ok(Some(ChunkContinuation {
            job_id: job.id,
            next_offset: range.end,
        }))
    }

    fn worker_for(&self, job: &BulkJob) -> Result<Arc<dyn ChunkWorker>> {
        self.workers
            .get(job.kind)
            .ok_or_else(|| LoyaltyError::Internal(format!("未注册分片执行器: {}", job.kind)))
    }

    async fn finalize(&self, job: &BulkJob, worker: &dyn ChunkWorker) -> Result<()> {
        if job.status == JobStatus::Processing
            && !self.jobs.begin_finalize(job.id, &self.owner).await?
        {
            return Ok(());
        }

        let now = self.clock.now();
        let progress = worker.progress(job).await?;
        if progress.produced == 0 {
            if self.jobs.fail(job.id, "任务未产出任何单元", now).await? {
                metrics::record_bulk_job(job.kind.as_str(), "failed");
            }
            warn!(job_id = job.id, failed = progress.failed, "任务未产出任何单元");
            return Ok(());
        }

        let artifact = match worker.finalize(job).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(job_id = job.id, error = %e, "任务收尾失败");
                if self
                    .jobs
                    .fail(job.id, &format!("收尾失败: {}", e), now)
                    .await?
                {
                    metrics::record_bulk_job(job.kind.as_str(), "failed");
                }
                return Ok(());
            }
        };

        if self
            .jobs
            .complete(job.id, artifact.clone(), progress.produced, progress.failed, now)
            .await?
        {
            metrics::record_bulk_job(job.kind.as_str(), "completed");
            info!(
                job_id = job.id,
                produced = progress.produced,
                failed = progress.failed,
                artifact = artifact.as_deref().unwrap_or(""),
                "批量任务完成"
            );
        }
        Ok(())
    }
}
