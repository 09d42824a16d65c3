//! 参与者仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::ParticipantRepository;
use crate::error::Result;
use crate::models::{NewParticipant, Participant, ParticipantKind, RecipientFilter};

const PARTICIPANT_COLUMNS: &str = "id, external_id, username, first_name, last_name, \
     phone_number, language, region, kind, balance, is_active, last_contacted_at, \
     deactivated_at, created_at";

/// PostgreSQL 参与者仓储
pub struct PgParticipantRepository {
    pool: PgPool,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRepository for PgParticipantRepository {
    async fn create(&self, participant: &NewParticipant) -> Result<Participant> {
        let sql = format!(
            r#"
            INSERT INTO participants
                (external_id, username, first_name, last_name, phone_number, language, region, kind)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, Participant>(&sql)
            .bind(participant.external_id)
            .bind(&participant.username)
            .bind(&participant.first_name)
            .bind(&participant.last_name)
            .bind(&participant.phone_number)
            .bind(&participant.language)
            .bind(&participant.region)
            .bind(participant.kind)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Participant>> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = $1");
        let row = sqlx::query_as::<_, Participant>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn get_by_external_id(&self, external_id: i64) -> Result<Option<Participant>> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE external_id = $1");
        let row = sqlx::query_as::<_, Participant>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn claim_kind(&self, id: i64, kind: ParticipantKind) -> Result<bool> {
        // 同一行上的并发绑定由行锁串行化，后到者看到已提交的类型
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET kind = $2, updated_at = CASE WHEN kind IS NULL THEN NOW() ELSE updated_at END
            WHERE id = $1 AND (kind IS NULL OR kind = $2)
            "#,
        )
        .bind(id)
        .bind(kind)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_cached_balance(&self, id: i64, balance: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE participants SET balance = $2, updated_at = NOW()
            WHERE id = $1 AND balance <> $2
            "#,
        )
        .bind(id)
        .bind(balance)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE participants SET is_active = FALSE, deactivated_at = $2, updated_at = NOW()
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reactivate(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE participants SET is_active = TRUE, deactivated_at = NULL, updated_at = NOW()
            WHERE id = $1 AND NOT is_active
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_contacted(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE participants SET last_contacted_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_matching_ids(&self, filter: &RecipientFilter) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM participants
            WHERE is_active
              AND ($1::VARCHAR IS NULL OR kind = $1)
              AND ($2::VARCHAR IS NULL OR language = $2)
              AND ($3::VARCHAR IS NULL OR region = $3)
            ORDER BY id
            "#,
        )
        .bind(filter.kind)
        .bind(&filter.language)
        .bind(&filter.region)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn top_by_balance(&self, limit: i64) -> Result<Vec<Participant>> {
        let sql = format!(
            r#"
            SELECT {PARTICIPANT_COLUMNS} FROM participants
            WHERE balance > 0
            ORDER BY balance DESC, id ASC
            LIMIT $1
            "#
        );
        let rows = sqlx::query_as::<_, Participant>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}
