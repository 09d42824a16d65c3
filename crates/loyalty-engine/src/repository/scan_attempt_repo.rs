//! 扫码记录仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::ScanAttemptRepository;
use crate::error::Result;

/// PostgreSQL 扫码记录仓储
pub struct PgScanAttemptRepository {
    pool: PgPool,
}

impl PgScanAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanAttemptRepository for PgScanAttemptRepository {
    async fn count_failed_since(&self, participant_id: i64, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scan_attempts
            WHERE participant_id = $1 AND NOT succeeded AND attempted_at >= $2
            "#,
        )
        .bind(participant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn record(
        &self,
        participant_id: i64,
        code_id: i64,
        attempted_at: DateTime<Utc>,
        succeeded: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_attempts (participant_id, code_id, attempted_at, succeeded)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(participant_id)
        .bind(code_id)
        .bind(attempted_at)
        .bind(succeeded)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
