//! 码仓储
//!
//! 唯一性由数据库约束保证，写入冲突以 `InsertCodeOutcome` 返回而非错误

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::{CodeRepository, InsertCodeOutcome};
use super::unique_violation;
use crate::error::Result;
use crate::models::{Code, NewCode, ParticipantKind};

const CODE_COLUMNS: &str = "id, code, hash, serial_number, kind, reward_value, is_scanned, \
     scanned_by, scanned_at, job_id, job_seq, created_at";

/// PostgreSQL 码仓储
pub struct PgCodeRepository {
    pool: PgPool,
}

impl PgCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CodeRepository for PgCodeRepository {
    async fn insert(&self, code: &NewCode) -> Result<InsertCodeOutcome> {
        let sql = format!(
            r#"
            INSERT INTO codes (code, hash, serial_number, kind, reward_value, job_id, job_seq)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CODE_COLUMNS}
            "#
        );

        let result = sqlx::query_as::<_, Code>(&sql)
            .bind(&code.code)
            .bind(&code.hash)
            .bind(&code.serial_number)
            .bind(code.kind)
            .bind(code.reward_value)
            .bind(code.job_id)
            .bind(code.job_seq)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Ok(InsertCodeOutcome::Inserted(row)),
            Err(e) => match unique_violation(&e).as_deref() {
                Some("codes_serial_number_key") => Ok(InsertCodeOutcome::DuplicateSerial),
                Some("codes_job_slot_key") => Ok(InsertCodeOutcome::DuplicateJobSlot),
                Some(_) => Ok(InsertCodeOutcome::DuplicateIdentifier),
                None => Err(e.into()),
            },
        }
    }

    async fn identifier_exists(&self, code: &str, hash: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM codes WHERE code = $1 OR hash = $2)",
        )
        .bind(code)
        .bind(hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find_by_identifier(&self, code: &str, hash: &str) -> Result<Option<Code>> {
        let sql = format!(
            "SELECT {CODE_COLUMNS} FROM codes WHERE code = $1 OR hash = $2 ORDER BY id LIMIT 1"
        );
        let row = sqlx::query_as::<_, Code>(&sql)
            .bind(code)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn mark_scanned(
        &self,
        code_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE codes
            SET is_scanned = TRUE, scanned_by = $2, scanned_at = $3
            WHERE id = $1 AND is_scanned = FALSE
            "#,
        )
        .bind(code_id)
        .bind(participant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn last_serial(&self, kind: ParticipantKind) -> Result<Option<String>> {
        // 序列号定宽零填充，按字符串倒序即数值倒序
        let serial: Option<String> = sqlx::query_scalar(
            r#"
            SELECT serial_number FROM codes
            WHERE kind = $1
            ORDER BY length(serial_number) DESC, serial_number DESC
            LIMIT 1
            "#,
        )
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(serial)
    }

    async fn sum_rewards_scanned_by(&self, participant_id: i64) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(reward_value), 0)::BIGINT FROM codes WHERE scanned_by = $1 AND is_scanned",
        )
        .bind(participant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn existing_job_seqs(&self, job_id: i64, start: i64, end: i64) -> Result<Vec<i64>> {
        let seqs: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT job_seq FROM codes
            WHERE job_id = $1 AND job_seq >= $2 AND job_seq < $3
            ORDER BY job_seq
            "#,
        )
        .bind(job_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(seqs)
    }

    async fn count_by_job(&self, job_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM codes WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn list_by_job(&self, job_id: i64) -> Result<Vec<Code>> {
        let sql = format!("SELECT {CODE_COLUMNS} FROM codes WHERE job_id = $1 ORDER BY job_seq");
        let rows = sqlx::query_as::<_, Code>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}
