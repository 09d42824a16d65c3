//! 礼品与兑换仓储
//!
//! 兑换申请的创建与取消都是单事务/单行条件更新，
//! 可用积分在事务内按账本公式重算，避免并发申请透支。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::traits::{RedemptionRepository, RequestCreation};
use crate::error::{LoyaltyError, Result};
use crate::models::{Gift, NewGift, RedemptionRequest, RedemptionStatus, StatusChange};

const REQUEST_COLUMNS: &str = "id, participant_id, gift_id, points_cost, status, requested_at, \
     processed_at, confirmed_at, user_confirmed, admin_notes, user_comment";

/// PostgreSQL 兑换仓储
pub struct PgRedemptionRepository {
    pool: PgPool,
}

impl PgRedemptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn committed_cost_in(conn: &mut PgConnection, participant_id: i64) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(points_cost), 0)::BIGINT FROM redemption_requests
            WHERE participant_id = $1 AND status <> ALL($2)
            "#,
        )
        .bind(participant_id)
        .bind(returned_statuses())
        .fetch_one(&mut *conn)
        .await?;

        Ok(total)
    }
}

fn returned_statuses() -> Vec<String> {
    RedemptionStatus::RETURNED
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

#[async_trait]
impl RedemptionRepository for PgRedemptionRepository {
    async fn create_gift(&self, gift: &NewGift) -> Result<Gift> {
        let row = sqlx::query_as::<_, Gift>(
            r#"
            INSERT INTO gifts (name, description, points_cost, kind)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, points_cost, kind, is_active
            "#,
        )
        .bind(&gift.name)
        .bind(&gift.description)
        .bind(gift.points_cost)
        .bind(gift.kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_gift(&self, id: i64) -> Result<Option<Gift>> {
        let row = sqlx::query_as::<_, Gift>(
            "SELECT id, name, description, points_cost, kind, is_active FROM gifts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_gift_cost(&self, id: i64, points_cost: i64) -> Result<()> {
        sqlx::query("UPDATE gifts SET points_cost = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(points_cost)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_request_if_affordable(
        &self,
        participant_id: i64,
        gift_id: i64,
        points_cost: i64,
        now: DateTime<Utc>,
    ) -> Result<RequestCreation> {
        let mut tx = self.pool.begin().await?;

        // 同一参与者的并发申请在此串行化
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM participants WHERE id = $1 FOR UPDATE")
                .bind(participant_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(LoyaltyError::ParticipantNotFound(participant_id));
        }

        let earned: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(reward_value), 0)::BIGINT FROM codes WHERE scanned_by = $1 AND is_scanned",
        )
        .bind(participant_id)
        .fetch_one(&mut *tx)
        .await?;
        let committed = Self::committed_cost_in(&mut *tx, participant_id).await?;
        let available = (earned - committed).max(0);

        if available < points_cost {
            tx.rollback().await?;
            return Ok(RequestCreation::Insufficient { available });
        }

        let sql = format!(
            r#"
            INSERT INTO redemption_requests (participant_id, gift_id, points_cost, status, requested_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let request = sqlx::query_as::<_, RedemptionRequest>(&sql)
            .bind(participant_id)
            .bind(gift_id)
            .bind(points_cost)
            .bind(RedemptionStatus::Pending)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(RequestCreation::Created(request))
    }

    async fn get_request(&self, id: i64) -> Result<Option<RedemptionRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM redemption_requests WHERE id = $1");
        let row = sqlx::query_as::<_, RedemptionRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn list_requests(&self, participant_id: i64) -> Result<Vec<RedemptionRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM redemption_requests WHERE participant_id = $1 ORDER BY requested_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, RedemptionRequest>(&sql)
            .bind(participant_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn sum_committed_cost(&self, participant_id: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::committed_cost_in(&mut *conn, participant_id).await
    }

    async fn apply_status_change(
        &self,
        id: i64,
        change: &StatusChange,
    ) -> Result<Option<RedemptionRequest>> {
        let sql = format!(
            r#"
            UPDATE redemption_requests SET
                status = $3,
                processed_at = COALESCE(processed_at, $4),
                confirmed_at = COALESCE($5, confirmed_at),
                user_confirmed = COALESCE($6, user_confirmed),
                admin_notes = COALESCE($7, admin_notes),
                user_comment = COALESCE($8, user_comment),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RedemptionRequest>(&sql)
            .bind(id)
            .bind(change.expected)
            .bind(change.next)
            .bind(change.processed_at)
            .bind(change.confirmed_at)
            .bind(change.user_confirmed)
            .bind(&change.admin_notes)
            .bind(&change.user_comment)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn cancel_pending(
        &self,
        id: i64,
        participant_id: i64,
        requested_after: DateTime<Utc>,
    ) -> Result<Option<RedemptionRequest>> {
        let sql = format!(
            r#"
            UPDATE redemption_requests SET status = $4, updated_at = NOW()
            WHERE id = $1 AND participant_id = $2 AND status = $5 AND requested_at >= $3
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RedemptionRequest>(&sql)
            .bind(id)
            .bind(participant_id)
            .bind(requested_after)
            .bind(RedemptionStatus::CancelledByUser)
            .bind(RedemptionStatus::Pending)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }
}
