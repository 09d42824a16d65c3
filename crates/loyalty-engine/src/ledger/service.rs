//! 积分账本服务

use std::sync::Arc;
use std::time::Duration;

use loyalty_shared::observability::metrics;
use tracing::{debug, info, instrument, warn};

use super::cache::BalanceCache;
use crate::error::{LoyaltyError, Result};
use crate::models::LeaderboardEntry;
use crate::repository::{CodeRepository, ParticipantRepository, RedemptionRepository};

/// 积分账本
///
/// 参与者表上的 `balance` 只是反范式副本，每次重算发现不一致时回写，
/// 任何调用方都不直接修改它。
pub struct PointsLedger {
    codes: Arc<dyn CodeRepository>,
    redemptions: Arc<dyn RedemptionRepository>,
    participants: Arc<dyn ParticipantRepository>,
    cache: Arc<dyn BalanceCache>,
    ttl: Duration,
}

impl PointsLedger {
    pub fn new(
        codes: Arc<dyn CodeRepository>,
        redemptions: Arc<dyn RedemptionRepository>,
        participants: Arc<dyn ParticipantRepository>,
        cache: Arc<dyn BalanceCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            codes,
            redemptions,
            participants,
            cache,
            ttl,
        }
    }

    /// 查询余额
    ///
    /// `fresh = false` 时优先返回 TTL 内的缓存值；缓存不可用时降级为重算
    #[instrument(skip(self))]
    pub async fn balance(&self, participant_id: i64, fresh: bool) -> Result<i64> {
        if !fresh {
            match self.cache.get(participant_id).await {
                Ok(Some(balance)) => {
                    debug!(participant_id, balance, "余额缓存命中");
                    return Ok(balance);
                }
                Ok(None) => {}
                Err(e) => warn!(participant_id, error = %e, "读取余额缓存失败，改为重算"),
            }
        }

        self.recompute(participant_id).await
    }

    /// 删除缓存，不触发重算
    pub async fn invalidate(&self, participant_id: i64) {
        if let Err(e) = self.cache.delete(participant_id).await {
            // 删除失败时旧值最多存活一个 TTL
            warn!(participant_id, error = %e, "删除余额缓存失败");
        }
    }

    /// 失效后强制重算，写路径在返回前调用
    pub async fn refresh(&self, participant_id: i64) -> Result<i64> {
        self.invalidate(participant_id).await;
        self.balance(participant_id, true).await
    }

    async fn recompute(&self, participant_id: i64) -> Result<i64> {
        let participant = self
            .participants
            .get(participant_id)
            .await?
            .ok_or(LoyaltyError::ParticipantNotFound(participant_id))?;

        let earned = self.codes.sum_rewards_scanned_by(participant_id).await?;
        let committed = self.redemptions.sum_committed_cost(participant_id).await?;
        let balance = (earned - committed).max(0);

        if let Err(e) = self.cache.set(participant_id, balance, self.ttl).await {
            warn!(participant_id, error = %e, "写入余额缓存失败");
        }

        let reconciled = participant.balance != balance;
        if reconciled {
            self.participants
                .update_cached_balance(participant_id, balance)
                .await?;
            info!(
                participant_id,
                stored = participant.balance,
                balance,
                "参与者余额已校正"
            );
        }
        metrics::record_balance_recompute(reconciled);

        Ok(balance)
    }

    /// 余额排行榜
    #[instrument(skip(self))]
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let rows = self.participants.top_by_balance(limit as i64).await?;

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                rank: i as u32 + 1,
                participant_id: p.id,
                display_name: p.display_name(),
                kind: p.kind,
                balance: p.balance,
            })
            .collect())
    }
}
