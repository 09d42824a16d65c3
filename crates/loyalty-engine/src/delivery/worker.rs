//! 投递任务的分片执行器

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::pipeline::DeliveryPipeline;
use crate::batch::{ChunkWorker, JobProgress};
use crate::error::Result;
use crate::models::{BulkJob, JobKind};
use crate::repository::JobRepository;

/// 群发消息的分片执行器
pub struct DeliveryWorker {
    pipeline: Arc<DeliveryPipeline>,
    jobs: Arc<dyn JobRepository>,
}

impl DeliveryWorker {
    pub fn new(pipeline: Arc<DeliveryPipeline>, jobs: Arc<dyn JobRepository>) -> Self {
        Self { pipeline, jobs }
    }
}

#[async_trait]
impl ChunkWorker for DeliveryWorker {
    fn kind(&self) -> JobKind {
        JobKind::MessageDelivery
    }

    async fn execute(&self, job: &BulkJob, start: i64, end: i64) -> Result<()> {
        self.pipeline.deliver_chunk(job, start, end).await.map(|_| ())
    }

    async fn progress(&self, job: &BulkJob) -> Result<JobProgress> {
        let counts = self.jobs.count_outcomes(job.id).await?;
        Ok(JobProgress {
            produced: counts.delivered,
            failed: counts.failed(),
        })
    }

    async fn finalize(&self, job: &BulkJob) -> Result<Option<String>> {
        let counts = self.jobs.count_outcomes(job.id).await?;
        info!(
            job_id = job.id,
            delivered = counts.delivered,
            permanent_failure = counts.permanent_failure,
            transient_failure = counts.transient_failure,
            skipped = counts.skipped,
            "群发任务汇总"
        );
        Ok(None)
    }
}
