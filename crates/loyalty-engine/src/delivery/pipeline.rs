//! 消息投递管道

use std::sync::Arc;
use std::time::Duration;

use loyalty_shared::config::DeliveryConfig;
use loyalty_shared::observability::metrics;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::channel::{DeliveryOutcome, MessagingChannel};
use crate::clock::Clock;
use crate::error::{LoyaltyError, Result};
use crate::models::{BulkJob, JobPayload, OutcomeCounts, Participant, RecipientOutcome};
use crate::repository::{JobRepository, ParticipantRepository};

/// 消息投递管道
///
/// 所有发送共享一个节拍器，相邻两次发送至少间隔 `1 / max_rate`，
/// 并发执行的多个投递任务合计也不会超过渠道速率上限。
pub struct DeliveryPipeline {
    participants: Arc<dyn ParticipantRepository>,
    jobs: Arc<dyn JobRepository>,
    channel: Arc<dyn MessagingChannel>,
    clock: Arc<dyn Clock>,
    send_interval: Duration,
    checkpoint_every: u32,
    next_slot: Mutex<Option<Instant>>,
}

impl DeliveryPipeline {
    pub fn new(
        participants: Arc<dyn ParticipantRepository>,
        jobs: Arc<dyn JobRepository>,
        channel: Arc<dyn MessagingChannel>,
        clock: Arc<dyn Clock>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            participants,
            jobs,
            channel,
            clock,
            send_interval: config.send_interval(),
            checkpoint_every: config.checkpoint_every.max(1),
            next_slot: Mutex::new(None),
        }
    }

    /// 投递任务 `[start, end)` 区间内的收件人
    ///
    /// 已有结果的收件人直接跳过，分片重放不会重复发送。
    /// 返回本次实际处理的结果统计。
    #[instrument(skip(self, job), fields(job_id = job.id))]
    pub async fn deliver_chunk(&self, job: &BulkJob, start: i64, end: i64) -> Result<OutcomeCounts> {
        let JobPayload::Delivery {
            text, attachment, ..
        } = job.payload()?
        else {
            return Err(LoyaltyError::Internal(format!(
                "任务 {} 的参数不是投递任务",
                job.id
            )));
        };

        let recipients = self.jobs.list_recipients(job.id, start, end).await?;
        let mut counts = OutcomeCounts::default();
        let mut processed: u32 = 0;

        for recipient in recipients.iter().filter(|r| r.outcome.is_none()) {
            let participant = self.participants.get(recipient.participant_id).await?;
            let (outcome, error) = match participant {
                Some(p) if p.is_active => self.send_to(&p, &text, attachment.clone()).await?,
                _ => {
                    metrics::record_delivery("skipped");
                    (RecipientOutcome::Skipped, Some("参与者不可达".to_string()))
                }
            };

            self.jobs
                .record_recipient_outcome(job.id, recipient.seq, outcome, error, self.clock.now())
                .await?;
            counts.add(outcome, 1);

            processed += 1;
            if processed % self.checkpoint_every == 0 {
                self.checkpoint(job.id).await?;
            }
        }

        debug!(
            start,
            end,
            delivered = counts.delivered,
            failed = counts.failed(),
            "投递分片处理完成"
        );
        Ok(counts)
    }

    /// 单独给一个参与者发消息，结果分类与群发一致
    #[instrument(skip(self, text, attachment))]
    pub async fn send_personal(
        &self,
        participant_id: i64,
        text: &str,
        attachment: Option<String>,
    ) -> Result<RecipientOutcome> {
        if text.trim().is_empty() {
            return Err(LoyaltyError::Validation("消息内容不能为空".into()));
        }

        let participant = self
            .participants
            .get(participant_id)
            .await?
            .ok_or(LoyaltyError::ParticipantNotFound(participant_id))?;

        if !participant.is_active {
            info!(participant_id, "参与者已标记为不可达，跳过发送");
            metrics::record_delivery("skipped");
            return Ok(RecipientOutcome::Skipped);
        }

        let (outcome, _) = self.send_to(&participant, text, attachment).await?;
        Ok(outcome)
    }

    /// 把不可达的参与者恢复为可发送
    #[instrument(skip(self))]
    pub async fn reactivate(&self, participant_id: i64) -> Result<bool> {
        if self.participants.get(participant_id).await?.is_none() {
            return Err(LoyaltyError::ParticipantNotFound(participant_id));
        }

        let changed = self.participants.reactivate(participant_id).await?;
        if changed {
            info!(participant_id, "参与者已恢复为可达");
        }
        Ok(changed)
    }

    async fn send_to(
        &self,
        participant: &Participant,
        text: &str,
        attachment: Option<String>,
    ) -> Result<(RecipientOutcome, Option<String>)> {
        self.pace().await;

        let outcome = match self
            .channel
            .send(participant.external_id, text, attachment)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => DeliveryOutcome::TransientFailure(e.to_string()),
        };
        metrics::record_delivery(outcome.label());

        let now = self.clock.now();
        Ok(match outcome {
            DeliveryOutcome::Delivered => {
                self.participants.mark_contacted(participant.id, now).await?;
                (RecipientOutcome::Delivered, None)
            }
            DeliveryOutcome::PermanentFailure(reason) => {
                self.participants.deactivate(participant.id, now).await?;
                warn!(participant_id = participant.id, reason = %reason, "收件人不可达，已停用");
                (RecipientOutcome::PermanentFailure, Some(reason))
            }
            DeliveryOutcome::TransientFailure(reason) => {
                debug!(participant_id = participant.id, reason = %reason, "发送临时失败");
                (RecipientOutcome::TransientFailure, Some(reason))
            }
        })
    }

    /// 等到下一个发送时隙
    async fn pace(&self) {
        if self.send_interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.send_interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    async fn checkpoint(&self, job_id: i64) -> Result<()> {
        let counts = self.jobs.count_outcomes(job_id).await?;
        self.jobs
            .update_counts(job_id, counts.delivered, counts.failed())
            .await
    }
}
