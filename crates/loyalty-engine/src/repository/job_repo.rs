//! 批量任务仓储
//!
//! 任务领取使用 `FOR UPDATE SKIP LOCKED` 并写入执行租约，多实例部署时同一任务
//! 同一时刻只有一个持有者；推进游标与进入收尾都要求调用方仍持有租约。
//! 所有状态推进都是带前置条件的单行更新。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::traits::JobRepository;
use crate::error::Result;
use crate::models::{
    BulkJob, JobLease, JobRecipient, JobStatus, NewBulkJob, OutcomeCounts, RecipientOutcome,
};

const JOB_COLUMNS: &str = "id, kind, payload, total_units, chunk_size, status, next_offset, \
     produced_count, failure_count, cancel_requested, artifact, error_message, created_at, \
     started_at, completed_at, claimed_by, lease_expires_at";

const RESUMABLE: [JobStatus; 2] = [JobStatus::Processing, JobStatus::Finalizing];

const UNFINISHED: [JobStatus; 3] = [JobStatus::Pending, JobStatus::Processing, JobStatus::Finalizing];

fn status_list(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// PostgreSQL 批量任务仓储
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, job: &NewBulkJob, recipients: &[i64]) -> Result<BulkJob> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO bulk_jobs (kind, payload, total_units, chunk_size, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, BulkJob>(&sql)
            .bind(job.kind)
            .bind(&job.payload)
            .bind(job.total_units)
            .bind(job.chunk_size)
            .bind(JobStatus::Pending)
            .fetch_one(&mut *tx)
            .await?;

        if !recipients.is_empty() {
            let seqs: Vec<i64> = (0..recipients.len() as i64).collect();
            sqlx::query(
                r#"
                INSERT INTO bulk_job_recipients (job_id, seq, participant_id)
                SELECT $1, t.seq, t.participant_id
                FROM UNNEST($2::BIGINT[], $3::BIGINT[]) AS t(seq, participant_id)
                "#,
            )
            .bind(created.id)
            .bind(&seqs)
            .bind(recipients)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<BulkJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM bulk_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, BulkJob>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn claim_next_pending(&self, lease: &JobLease) -> Result<Option<BulkJob>> {
        let mut tx = self.pool.begin().await?;

        // 在事务内抢占任务，领取、状态变更和租约写入是原子操作
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM bulk_jobs
            WHERE status = $1 AND NOT cancel_requested
            ORDER BY created_at ASC, id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(JobStatus::Pending)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            return Ok(None);
        };

        let sql = format!(
            r#"
            UPDATE bulk_jobs
            SET status = $2, started_at = COALESCE(started_at, $3),
                claimed_by = $4, lease_expires_at = $5
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let job = sqlx::query_as::<_, BulkJob>(&sql)
            .bind(id)
            .bind(JobStatus::Processing)
            .bind(lease.now)
            .bind(&lease.owner)
            .bind(lease.expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn claim_resumable(&self, lease: &JobLease) -> Result<Option<BulkJob>> {
        let mut tx = self.pool.begin().await?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM bulk_jobs
            WHERE status = ANY($1)
              AND (claimed_by IS NULL OR lease_expires_at IS NULL OR lease_expires_at <= $2)
            ORDER BY id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(status_list(&RESUMABLE))
        .bind(lease.now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            return Ok(None);
        };

        let sql = format!(
            r#"
            UPDATE bulk_jobs SET claimed_by = $2, lease_expires_at = $3
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let job = sqlx::query_as::<_, BulkJob>(&sql)
            .bind(id)
            .bind(&lease.owner)
            .bind(lease.expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn start(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs SET status = $2, started_at = COALESCE(started_at, $3)
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id)
        .bind(JobStatus::Processing)
        .bind(now)
        .bind(JobStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn acquire_lease(&self, id: i64, lease: &JobLease) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs SET claimed_by = $2, lease_expires_at = $3
            WHERE id = $1 AND status = ANY($4)
              AND (claimed_by IS NULL OR claimed_by = $2
                   OR lease_expires_at IS NULL OR lease_expires_at <= $5)
            "#,
        )
        .bind(id)
        .bind(&lease.owner)
        .bind(lease.expires_at)
        .bind(status_list(&UNFINISHED))
        .bind(lease.now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn advance_cursor(
        &self,
        id: i64,
        lease: &JobLease,
        expected_offset: i64,
        next_offset: i64,
        produced: i64,
        failed: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs
            SET next_offset = $3, produced_count = $4, failure_count = $5, lease_expires_at = $8
            WHERE id = $1 AND next_offset = $2 AND status = $6 AND claimed_by = $7
            "#,
        )
        .bind(id)
        .bind(expected_offset)
        .bind(next_offset)
        .bind(produced)
        .bind(failed)
        .bind(JobStatus::Processing)
        .bind(&lease.owner)
        .bind(lease.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_counts(&self, id: i64, produced: i64, failed: i64) -> Result<()> {
        sqlx::query("UPDATE bulk_jobs SET produced_count = $2, failure_count = $3 WHERE id = $1")
            .bind(id)
            .bind(produced)
            .bind(failed)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn begin_finalize(&self, id: i64, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs SET status = $2
            WHERE id = $1 AND status = $3 AND next_offset >= total_units AND claimed_by = $4
            "#,
        )
        .bind(id)
        .bind(JobStatus::Finalizing)
        .bind(JobStatus::Processing)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        id: i64,
        artifact: Option<String>,
        produced: i64,
        failed: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs
            SET status = $2, artifact = $3, produced_count = $4, failure_count = $5, completed_at = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(id)
        .bind(JobStatus::Completed)
        .bind(artifact)
        .bind(produced)
        .bind(failed)
        .bind(now)
        .bind(JobStatus::Finalizing)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: i64, message: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs SET status = $2, error_message = $3, completed_at = $4
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(JobStatus::Failed)
        .bind(message)
        .bind(now)
        .bind(status_list(&UNFINISHED))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn request_cancel(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE bulk_jobs SET cancel_requested = TRUE WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(status_list(&UNFINISHED))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_cancelled(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs SET status = $2, completed_at = $3
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(JobStatus::Cancelled)
        .bind(now)
        .bind(status_list(&UNFINISHED))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_recipients(
        &self,
        job_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<JobRecipient>> {
        let rows = sqlx::query_as::<_, JobRecipient>(
            r#"
            SELECT job_id, seq, participant_id, outcome, error, processed_at
            FROM bulk_job_recipients
            WHERE job_id = $1 AND seq >= $2 AND seq < $3
            ORDER BY seq
            "#,
        )
        .bind(job_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn record_recipient_outcome(
        &self,
        job_id: i64,
        seq: i64,
        outcome: RecipientOutcome,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bulk_job_recipients SET outcome = $3, error = $4, processed_at = $5
            WHERE job_id = $1 AND seq = $2 AND outcome IS NULL
            "#,
        )
        .bind(job_id)
        .bind(seq)
        .bind(outcome)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_outcomes(&self, job_id: i64) -> Result<OutcomeCounts> {
        let rows = sqlx::query(
            r#"
            SELECT outcome, COUNT(*) AS n FROM bulk_job_recipients
            WHERE job_id = $1 AND outcome IS NOT NULL
            GROUP BY outcome
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = OutcomeCounts::default();
        for row in rows {
            let outcome: RecipientOutcome = row.try_get("outcome")?;
            let n: i64 = row.try_get("n")?;
            counts.add(outcome, n);
        }
        Ok(counts)
    }
}
