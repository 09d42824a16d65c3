//! 礼品兑换服务
//!
//! 每个改变申请的动作在返回前都会失效并强制重算参与者余额，
//! 调用方拿到的余额总是反映本次动作之后的账本。

use std::sync::Arc;

use chrono::Duration;
use loyalty_shared::config::RedemptionConfig;
use loyalty_shared::observability::metrics;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::transitions::check_operator_transition;
use crate::clock::Clock;
use crate::error::{LoyaltyError, Result};
use crate::ledger::PointsLedger;
use crate::models::{OperatorRole, RedemptionRequest, RedemptionStatus, StatusChange};
use crate::repository::{ParticipantRepository, RedemptionRepository, RequestCreation};

/// 兑换动作的返回：最新申请状态与动作后的余额
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResponse {
    pub request: RedemptionRequest,
    pub balance: i64,
}

/// 礼品兑换服务
pub struct RedemptionService {
    redemptions: Arc<dyn RedemptionRepository>,
    participants: Arc<dyn ParticipantRepository>,
    ledger: Arc<PointsLedger>,
    clock: Arc<dyn Clock>,
    cancel_window: Duration,
}

impl RedemptionService {
    pub fn new(
        redemptions: Arc<dyn RedemptionRepository>,
        participants: Arc<dyn ParticipantRepository>,
        ledger: Arc<PointsLedger>,
        clock: Arc<dyn Clock>,
        config: &RedemptionConfig,
    ) -> Self {
        Self {
            redemptions,
            participants,
            ledger,
            clock,
            cancel_window: Duration::seconds(config.cancel_window_seconds),
        }
    }

    /// 申请兑换礼品
    ///
    /// 1. 礼品存在且上架，类型限制满足
    /// 2. 强制重算余额做快速拒绝
    /// 3. 事务内再次校验余额并写入申请，花费在此锁定
    #[instrument(skip(self))]
    pub async fn request_gift(&self, participant_id: i64, gift_id: i64) -> Result<RedemptionResponse> {
        let participant = self
            .participants
            .get(participant_id)
            .await?
            .ok_or(LoyaltyError::ParticipantNotFound(participant_id))?;

        let gift = self
            .redemptions
            .get_gift(gift_id)
            .await?
            .ok_or(LoyaltyError::GiftNotFound(gift_id))?;
        if !gift.is_active {
            return Err(LoyaltyError::GiftInactive(gift_id));
        }
        if !gift.is_available_for(participant.kind) {
            return Err(LoyaltyError::GiftNotAvailableForKind {
                gift_id,
                kind: participant
                    .kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "UNSET".to_string()),
            });
        }

        let available = self.ledger.balance(participant_id, true).await?;
        if available < gift.points_cost {
            return Err(LoyaltyError::InsufficientPoints {
                required: gift.points_cost,
                available,
            });
        }

        let request = match self
            .redemptions
            .create_request_if_affordable(participant_id, gift_id, gift.points_cost, self.clock.now())
            .await?
        {
            RequestCreation::Created(request) => request,
            RequestCreation::Insufficient { available } => {
                warn!(participant_id, gift_id, available, "并发申请导致积分不足");
                return Err(LoyaltyError::InsufficientPoints {
                    required: gift.points_cost,
                    available,
                });
            }
        };

        metrics::record_redemption_transition("NEW", RedemptionStatus::Pending.as_str());
        let balance = self.ledger.refresh(participant_id).await?;

        info!(
            participant_id,
            gift_id,
            request_id = request.id,
            points_cost = request.points_cost,
            balance,
            "兑换申请已创建"
        );

        Ok(RedemptionResponse { request, balance })
    }

    /// 参与者取消自己的申请
    ///
    /// 仅 pending 且在申请后取消窗口（默认一小时）内允许
    #[instrument(skip(self))]
    pub async fn cancel(&self, request_id: i64, participant_id: i64) -> Result<RedemptionResponse> {
        let request = self.owned_request(request_id, participant_id).await?;

        if request.status != RedemptionStatus::Pending {
            return Err(LoyaltyError::NotCancellable {
                request_id,
                reason: format!("当前状态为 {}", request.status),
            });
        }

        let now = self.clock.now();
        if now - request.requested_at > self.cancel_window {
            return Err(LoyaltyError::NotCancellable {
                request_id,
                reason: "已超过取消时限".to_string(),
            });
        }

        let cancelled = self
            .redemptions
            .cancel_pending(request_id, participant_id, now - self.cancel_window)
            .await?
            .ok_or_else(|| LoyaltyError::NotCancellable {
                request_id,
                reason: "申请状态已被并发修改".to_string(),
            })?;

        metrics::record_redemption_transition(
            RedemptionStatus::Pending.as_str(),
            RedemptionStatus::CancelledByUser.as_str(),
        );
        let balance = self.ledger.refresh(participant_id).await?;

        info!(request_id, participant_id, balance, "兑换申请已由参与者取消");
        Ok(RedemptionResponse {
            request: cancelled,
            balance,
        })
    }

    /// 运营侧状态迁移（审批、发货、送达、驳回、标记未收到）
    #[instrument(skip(self, admin_notes))]
    pub async fn operator_transition(
        &self,
        request_id: i64,
        role: OperatorRole,
        to: RedemptionStatus,
        admin_notes: Option<String>,
    ) -> Result<RedemptionResponse> {
        let request = self
            .redemptions
            .get_request(request_id)
            .await?
            .ok_or(LoyaltyError::RedemptionNotFound(request_id))?;

        check_operator_transition(request_id, role, request.status, to)?;

        let change = StatusChange {
            processed_at: Some(self.clock.now()),
            admin_notes,
            ..StatusChange::new(request.status, to)
        };
        self.apply(request, change).await
    }

    /// 参与者确认收货结果，仅对已发货申请有效
    #[instrument(skip(self, comment))]
    pub async fn confirm_receipt(
        &self,
        request_id: i64,
        participant_id: i64,
        received: bool,
        comment: Option<String>,
    ) -> Result<RedemptionResponse> {
        let request = self.owned_request(request_id, participant_id).await?;
        let to = if received {
            RedemptionStatus::Completed
        } else {
            RedemptionStatus::NotReceived
        };

        if request.status != RedemptionStatus::Sent {
            return Err(LoyaltyError::InvalidTransition {
                request_id,
                from: request.status.to_string(),
                to: to.to_string(),
            });
        }

        // 确认时间记录参与者作答的时刻，收到与未收到都写入
        let change = StatusChange {
            confirmed_at: Some(self.clock.now()),
            user_confirmed: Some(received),
            user_comment: comment,
            ..StatusChange::new(request.status, to)
        };
        self.apply(request, change).await
    }

    /// 参与者的兑换历史（新到旧）
    pub async fn list_requests(&self, participant_id: i64) -> Result<Vec<RedemptionRequest>> {
        self.redemptions.list_requests(participant_id).await
    }

    async fn owned_request(&self, request_id: i64, participant_id: i64) -> Result<RedemptionRequest> {
        self.redemptions
            .get_request(request_id)
            .await?
            .filter(|r| r.participant_id == participant_id)
            .ok_or(LoyaltyError::RedemptionNotFound(request_id))
    }

    async fn apply(
        &self,
        request: RedemptionRequest,
        change: StatusChange,
    ) -> Result<RedemptionResponse> {
        let updated = self
            .redemptions
            .apply_status_change(request.id, &change)
            .await?
            .ok_or(LoyaltyError::ConcurrencyConflict)?;

        metrics::record_redemption_transition(change.expected.as_str(), change.next.as_str());
        let balance = self.ledger.refresh(request.participant_id).await?;

        info!(
            request_id = request.id,
            participant_id = request.participant_id,
            from = %change.expected,
            to = %change.next,
            balance,
            "兑换申请状态已变更"
        );

        Ok(RedemptionResponse {
            request: updated,
            balance,
        })
    }
}
