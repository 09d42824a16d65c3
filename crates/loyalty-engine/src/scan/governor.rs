//! 扫码治理服务

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use loyalty_shared::config::ScanConfig;
use loyalty_shared::observability::metrics;
use serde::Serialize;
use tracing::{info, instrument};

use crate::clock::Clock;
use crate::error::{LoyaltyError, Result};
use crate::ledger::PointsLedger;
use crate::models::ParticipantKind;
use crate::registry::CodeRegistry;
use crate::repository::{ParticipantRepository, ScanAttemptRepository};

/// 扫码拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ScanRejection {
    /// 今日失败次数已达上限，不写记录
    QuotaExceeded { failed_today: i64, quota: u32 },
    /// 码不存在，不写记录
    NotFound,
    /// 码已被扫描（含并发竞争失败），记一次失败
    AlreadyScanned,
    /// 参与者类型与码类型不一致，记一次失败
    CategoryMismatch {
        code_kind: ParticipantKind,
        participant_kind: ParticipantKind,
    },
}

/// 扫码结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Credited {
        code_id: i64,
        reward_value: i64,
        balance: i64,
    },
    Rejected(ScanRejection),
}

impl ScanOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Credited { .. } => "credited",
            Self::Rejected(ScanRejection::QuotaExceeded { .. }) => "quota_exceeded",
            Self::Rejected(ScanRejection::NotFound) => "not_found",
            Self::Rejected(ScanRejection::AlreadyScanned) => "already_scanned",
            Self::Rejected(ScanRejection::CategoryMismatch { .. }) => "category_mismatch",
        }
    }

    pub fn is_credited(&self) -> bool {
        matches!(self, Self::Credited { .. })
    }
}

/// 配额日的起点：偏移时区下当天零点对应的 UTC 时间
pub fn day_start(now: DateTime<Utc>, utc_offset_hours: i32) -> DateTime<Utc> {
    let offset = Duration::hours(utc_offset_hours as i64);
    let local_midnight = (now + offset).date_naive().and_time(NaiveTime::MIN);
    local_midnight.and_utc() - offset
}

/// 扫码治理
pub struct ScanGovernor {
    registry: Arc<CodeRegistry>,
    attempts: Arc<dyn ScanAttemptRepository>,
    participants: Arc<dyn ParticipantRepository>,
    ledger: Arc<PointsLedger>,
    clock: Arc<dyn Clock>,
    config: ScanConfig,
}

impl ScanGovernor {
    pub fn new(
        registry: Arc<CodeRegistry>,
        attempts: Arc<dyn ScanAttemptRepository>,
        participants: Arc<dyn ParticipantRepository>,
        ledger: Arc<PointsLedger>,
        clock: Arc<dyn Clock>,
        config: ScanConfig,
    ) -> Self {
        Self {
            registry,
            attempts,
            participants,
            ledger,
            clock,
            config,
        }
    }

    /// 处理一次扫码
    ///
    /// 拒绝以 `ScanOutcome::Rejected` 返回；只有参数非法或基础设施故障才返回错误
    #[instrument(skip(self))]
    pub async fn scan(&self, participant_id: i64, identifier: &str) -> Result<ScanOutcome> {
        let outcome = self.evaluate(participant_id, identifier).await?;
        metrics::record_scan(outcome.label());
        Ok(outcome)
    }

    async fn evaluate(&self, participant_id: i64, identifier: &str) -> Result<ScanOutcome> {
        let participant = self
            .participants
            .get(participant_id)
            .await?
            .ok_or(LoyaltyError::ParticipantNotFound(participant_id))?;
        let now = self.clock.now();

        // 1. 每日失败配额
        let since = day_start(now, self.config.day_boundary_utc_offset_hours);
        let failed_today = self
            .attempts
            .count_failed_since(participant_id, since)
            .await?;
        if failed_today >= self.config.daily_failed_quota as i64 {
            info!(participant_id, failed_today, "今日扫码失败次数已达上限");
            return Ok(ScanOutcome::Rejected(ScanRejection::QuotaExceeded {
                failed_today,
                quota: self.config.daily_failed_quota,
            }));
        }

        // 2. 解析码
        let Some(code) = self.registry.resolve(identifier).await? else {
            return Ok(ScanOutcome::Rejected(ScanRejection::NotFound));
        };

        // 3. 已扫描
        if code.is_scanned {
            self.attempts
                .record(participant_id, code.id, now, false)
                .await?;
            return Ok(ScanOutcome::Rejected(ScanRejection::AlreadyScanned));
        }

        // 4. 类型匹配：在入账前条件绑定类型，不依赖读取时的快照
        let kind_matches = match participant.kind {
            Some(kind) if kind != code.kind => false,
            _ => self.participants.claim_kind(participant_id, code.kind).await?,
        };
        if !kind_matches {
            self.attempts
                .record(participant_id, code.id, now, false)
                .await?;
            let participant_kind = match participant.kind {
                Some(kind) => kind,
                None => self
                    .participants
                    .get(participant_id)
                    .await?
                    .and_then(|p| p.kind)
                    .ok_or(LoyaltyError::ParticipantNotFound(participant_id))?,
            };
            info!(
                participant_id,
                code_kind = %code.kind,
                participant_kind = %participant_kind,
                "参与者类型与码类型不一致"
            );
            return Ok(ScanOutcome::Rejected(ScanRejection::CategoryMismatch {
                code_kind: code.kind,
                participant_kind,
            }));
        }

        // 5. 条件更新，竞争失败者视为已扫描
        if !self
            .registry
            .mark_scanned(code.id, participant_id, now)
            .await?
        {
            self.attempts
                .record(participant_id, code.id, now, false)
                .await?;
            info!(participant_id, code_id = code.id, "并发扫码竞争失败");
            return Ok(ScanOutcome::Rejected(ScanRejection::AlreadyScanned));
        }

        self.attempts
            .record(participant_id, code.id, now, true)
            .await?;
        let balance = self.ledger.refresh(participant_id).await?;

        info!(
            participant_id,
            code_id = code.id,
            reward = code.reward_value,
            balance,
            "扫码入账成功"
        );

        Ok(ScanOutcome::Credited {
            code_id: code.id,
            reward_value: code.reward_value,
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_start_utc() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 15, 30, 0).unwrap();
        assert_eq!(
            day_start(now, 0),
            Utc.with_ymd_and_hms(2026, 5, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_day_start_with_offset() {
        // UTC+5 的 5 月 11 日 02:00 对应 UTC 5 月 10 日 21:00
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 21, 0, 0).unwrap();
        assert_eq!(
            day_start(now, 5),
            Utc.with_ymd_and_hms(2026, 5, 10, 19, 0, 0).unwrap()
        );

        let earlier = Utc.with_ymd_and_hms(2026, 5, 10, 18, 59, 0).unwrap();
        assert_eq!(
            day_start(earlier, 5),
            Utc.with_ymd_and_hms(2026, 5, 9, 19, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(
            ScanOutcome::Rejected(ScanRejection::NotFound).label(),
            "not_found"
        );
        let credited = ScanOutcome::Credited {
            code_id: 1,
            reward_value: 50,
            balance: 50,
        };
        assert!(credited.is_credited());
        assert_eq!(credited.label(), "credited");
    }
}
