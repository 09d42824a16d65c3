//! 批量生成码
//!
//! 任务第 `seq` 个单元对应 `(job_id, seq)` 槽位，唯一约束保证分片重放时
//! 不会重复生成；产物是包含全部码的 CSV 清单。

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::worker::{ChunkWorker, JobProgress};
use crate::error::{LoyaltyError, Result};
use crate::models::{BulkJob, JobKind, JobPayload};
use crate::registry::CodeRegistry;
use crate::repository::CodeRepository;

const MANIFEST_HEADER: &str = "code,hash,serial_number,kind,reward";

/// 批量生成码的分片执行器
pub struct GenerationWorker {
    registry: Arc<CodeRegistry>,
    codes: Arc<dyn CodeRepository>,
    artifact_dir: PathBuf,
}

impl GenerationWorker {
    pub fn new(
        registry: Arc<CodeRegistry>,
        codes: Arc<dyn CodeRepository>,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            codes,
            artifact_dir: artifact_dir.into(),
        }
    }

    fn manifest_path(&self, job_id: i64) -> PathBuf {
        self.artifact_dir.join(format!("codes_job_{}.csv", job_id))
    }
}

#[async_trait]
impl ChunkWorker for GenerationWorker {
    fn kind(&self) -> JobKind {
        JobKind::CodeGeneration
    }

    #[instrument(skip(self, job), fields(job_id = job.id))]
    async fn execute(&self, job: &BulkJob, start: i64, end: i64) -> Result<()> {
        let JobPayload::Generation {
            kind, reward_value, ..
        } = job.payload()?
        else {
            return Err(LoyaltyError::Internal(format!(
                "任务 {} 的参数不是生成任务",
                job.id
            )));
        };

        let existing = self.codes.existing_job_seqs(job.id, start, end).await?;
        let mut created = 0;
        for seq in start..end {
            if existing.binary_search(&seq).is_ok() {
                continue;
            }
            if self
                .registry
                .create_for_job(kind, reward_value, job.id, seq)
                .await?
                .is_some()
            {
                created += 1;
            }
        }

        debug!(
            start,
            end,
            created,
            skipped = existing.len(),
            "生成分片处理完成"
        );
        Ok(())
    }

    async fn progress(&self, job: &BulkJob) -> Result<JobProgress> {
        Ok(JobProgress {
            produced: self.codes.count_by_job(job.id).await?,
            failed: 0,
        })
    }

    /// 写出码清单 CSV，返回文件路径
    async fn finalize(&self, job: &BulkJob) -> Result<Option<String>> {
        let codes = self.codes.list_by_job(job.id).await?;

        let mut manifest = String::with_capacity((codes.len() + 1) * 48);
        manifest.push_str(MANIFEST_HEADER);
        manifest.push('\n');
        for code in &codes {
            // 字段只含字母数字与连字符，无需转义
            let _ = writeln!(
                manifest,
                "{},{},{},{},{}",
                code.code, code.hash, code.serial_number, code.kind, code.reward_value
            );
        }

        tokio::fs::create_dir_all(&self.artifact_dir).await?;
        let path = self.manifest_path(job.id);
        tokio::fs::write(&path, manifest).await?;

        info!(job_id = job.id, rows = codes.len(), path = %path.display(), "码清单已写出");
        Ok(Some(path.to_string_lossy().into_owned()))
    }
}
