//! 批量任务后台 Worker
//!
//! 轮询领取 pending 状态的批量任务并交给 `ChainRunner` 驱动。
//! 领取时写入执行租约，多实例部署时同一任务同一时刻只会被一个实例执行。
//! 启动时以及没有待处理任务时，接管租约缺失或过期的处理中/收尾中任务，
//! 它们从持久化游标继续。

use std::sync::Arc;
use std::time::Duration;

use loyalty_shared::config::BatchConfig;
use loyalty_shared::observability::metrics;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};

use super::runner::ChainRunner;
use crate::error::Result;
use crate::repository::JobRepository;

/// 批量任务 Worker
pub struct JobWorker {
    runner: Arc<ChainRunner>,
    jobs: Arc<dyn JobRepository>,
    poll_interval: Duration,
    /// 同时执行的任务数上限
    slots: Arc<Semaphore>,
}

impl JobWorker {
    pub fn new(
        runner: Arc<ChainRunner>,
        jobs: Arc<dyn JobRepository>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            runner,
            jobs,
            poll_interval: Duration::from_secs(config.poll_interval_seconds.max(1)),
            slots: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
        }
    }

    /// 主循环：持续轮询直到收到停机信号
    ///
    /// 停机时不等待执行中的任务，它们在下次启动时从游标续跑
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            owner = self.runner.owner(),
            poll_interval = ?self.poll_interval,
            max_concurrent = self.slots.available_permits(),
            "JobWorker 已启动"
        );

        if let Err(e) = self.resume_unfinished().await {
            error!(error = %e, "续跑未完成任务失败");
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "批量任务轮询出错");
            }
            metrics::set_worker_last_run("job_worker");

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("JobWorker 已停止");
    }

    /// 接管租约缺失或过期的未完成任务，返回接管数量
    ///
    /// 其他实例仍持有有效租约的任务不会被接管；槽位用尽时剩余任务留给后续轮询
    pub async fn resume_unfinished(&self) -> Result<usize> {
        let mut resumed = 0;
        loop {
            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                break;
            };
            let Some(job) = self.jobs.claim_resumable(&self.runner.lease()).await? else {
                break;
            };

            info!(job_id = job.id, next_offset = job.next_offset, "续跑未完成任务");
            self.spawn_job(job.id, permit);
            resumed += 1;
        }

        Ok(resumed)
    }

    /// 有空闲槽位时领取一个任务，返回是否领取到
    ///
    /// 优先领取待处理任务，其次接管租约过期的任务（持有者已崩溃）
    pub async fn poll_once(&self) -> Result<bool> {
        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            return Ok(false);
        };

        let lease = self.runner.lease();
        if let Some(job) = self.jobs.claim_next_pending(&lease).await? {
            info!(job_id = job.id, kind = %job.kind, total_units = job.total_units, "领取到批量任务");
            self.spawn_job(job.id, permit);
            return Ok(true);
        }

        if let Some(job) = self.jobs.claim_resumable(&lease).await? {
            info!(job_id = job.id, next_offset = job.next_offset, "接管租约过期的任务");
            self.spawn_job(job.id, permit);
            return Ok(true);
        }

        Ok(false)
    }

    fn spawn_job(&self, job_id: i64, permit: tokio::sync::OwnedSemaphorePermit) {
        let runner = self.runner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match runner.run(job_id).await {
                Ok(job) => info!(job_id, status = %job.status.reported(), "批量任务执行结束"),
                Err(e) => warn!(job_id, error = %e, "批量任务执行中断"),
            }
        });
    }
}
