//! 内存仓储
//!
//! 用于测试和本地运行的全量内存实现。所有表放在同一把锁下，
//! 条件更新、唯一约束和事务语义与 PostgreSQL 实现保持一致。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::traits::{
    CodeRepository, InsertCodeOutcome, JobRepository, ParticipantRepository,
    RedemptionRepository, RequestCreation, ScanAttemptRepository,
};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    BulkJob, Code, Gift, JobLease, JobRecipient, JobStatus, NewBulkJob, NewCode, NewGift,
    NewParticipant, OutcomeCounts, Participant, ParticipantKind, RecipientFilter,
    RecipientOutcome, RedemptionRequest, RedemptionStatus, ScanAttempt, StatusChange,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    participants: BTreeMap<i64, Participant>,
    codes: BTreeMap<i64, Code>,
    attempts: Vec<ScanAttempt>,
    gifts: BTreeMap<i64, Gift>,
    requests: BTreeMap<i64, RedemptionRequest>,
    jobs: BTreeMap<i64, BulkJob>,
    recipients: BTreeMap<(i64, i64), JobRecipient>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn earned(&self, participant_id: i64) -> i64 {
        self.codes
            .values()
            .filter(|c| c.is_scanned && c.scanned_by == Some(participant_id))
            .map(|c| c.reward_value)
            .sum()
    }

    fn committed(&self, participant_id: i64) -> i64 {
        self.requests
            .values()
            .filter(|r| r.participant_id == participant_id && !r.status.is_returned())
            .map(|r| r.points_cost)
            .sum()
    }
}

fn take_lease(job: &mut BulkJob, lease: &JobLease) {
    job.claimed_by = Some(lease.owner.clone());
    job.lease_expires_at = Some(lease.expires_at);
}

/// 内存存储，同时实现全部仓储 trait
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    /// 接下来 N 次写码返回可重试的数据库错误
    injected_code_failures: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来的 `n` 次写码失败（模拟数据库抖动）
    pub fn inject_code_insert_failures(&self, n: u32) {
        self.injected_code_failures.store(n, Ordering::SeqCst);
    }

    /// 参与者的全部扫码记录
    pub fn attempts_of(&self, participant_id: i64) -> Vec<ScanAttempt> {
        self.tables
            .lock()
            .attempts
            .iter()
            .filter(|a| a.participant_id == participant_id)
            .cloned()
            .collect()
    }

    pub fn code_count(&self) -> usize {
        self.tables.lock().codes.len()
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_code_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CodeRepository for InMemoryStore {
    async fn insert(&self, code: &NewCode) -> Result<InsertCodeOutcome> {
        if self.take_injected_failure() {
            return Err(LoyaltyError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut t = self.tables.lock();
        if let Some(job_id) = code.job_id {
            if t.codes
                .values()
                .any(|c| c.job_id == Some(job_id) && c.job_seq == code.job_seq)
            {
                return Ok(InsertCodeOutcome::DuplicateJobSlot);
            }
        }
        if t.codes
            .values()
            .any(|c| c.code == code.code || c.hash == code.hash)
        {
            return Ok(InsertCodeOutcome::DuplicateIdentifier);
        }
        if t.codes
            .values()
            .any(|c| c.serial_number == code.serial_number)
        {
            return Ok(InsertCodeOutcome::DuplicateSerial);
        }

        let id = t.id();
        let row = Code {
            id,
            code: code.code.clone(),
            hash: code.hash.clone(),
            serial_number: code.serial_number.clone(),
            kind: code.kind,
            reward_value: code.reward_value,
            is_scanned: false,
            scanned_by: None,
            scanned_at: None,
            job_id: code.job_id,
            job_seq: code.job_seq,
            created_at: Utc::now(),
        };
        t.codes.insert(id, row.clone());
        Ok(InsertCodeOutcome::Inserted(row))
    }

    async fn identifier_exists(&self, code: &str, hash: &str) -> Result<bool> {
        let t = self.tables.lock();
        Ok(t.codes.values().any(|c| c.code == code || c.hash == hash))
    }

    async fn find_by_identifier(&self, code: &str, hash: &str) -> Result<Option<Code>> {
        let t = self.tables.lock();
        Ok(t.codes
            .values()
            .find(|c| c.code == code || c.hash == hash)
            .cloned())
    }

    async fn mark_scanned(
        &self,
        code_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.codes.get_mut(&code_id) {
            Some(code) if !code.is_scanned => {
                code.is_scanned = true;
                code.scanned_by = Some(participant_id);
                code.scanned_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn last_serial(&self, kind: ParticipantKind) -> Result<Option<String>> {
        let t = self.tables.lock();
        Ok(t.codes
            .values()
            .filter(|c| c.kind == kind)
            .map(|c| c.serial_number.clone())
            .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b))))
    }

    async fn sum_rewards_scanned_by(&self, participant_id: i64) -> Result<i64> {
        Ok(self.tables.lock().earned(participant_id))
    }

    async fn existing_job_seqs(&self, job_id: i64, start: i64, end: i64) -> Result<Vec<i64>> {
        let t = self.tables.lock();
        let mut seqs: Vec<i64> = t
            .codes
            .values()
            .filter(|c| c.job_id == Some(job_id))
            .filter_map(|c| c.job_seq)
            .filter(|s| (start..end).contains(s))
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    async fn count_by_job(&self, job_id: i64) -> Result<i64> {
        let t = self.tables.lock();
        Ok(t.codes.values().filter(|c| c.job_id == Some(job_id)).count() as i64)
    }

    async fn list_by_job(&self, job_id: i64) -> Result<Vec<Code>> {
        let t = self.tables.lock();
        let mut codes: Vec<Code> = t
            .codes
            .values()
            .filter(|c| c.job_id == Some(job_id))
            .cloned()
            .collect();
        codes.sort_by_key(|c| c.job_seq);
        Ok(codes)
    }
}

#[async_trait]
impl ScanAttemptRepository for InMemoryStore {
    async fn count_failed_since(&self, participant_id: i64, since: DateTime<Utc>) -> Result<i64> {
        let t = self.tables.lock();
        Ok(t.attempts
            .iter()
            .filter(|a| a.participant_id == participant_id && !a.succeeded && a.attempted_at >= since)
            .count() as i64)
    }

    async fn record(
        &self,
        participant_id: i64,
        code_id: i64,
        attempted_at: DateTime<Utc>,
        succeeded: bool,
    ) -> Result<()> {
        let mut t = self.tables.lock();
        if succeeded
            && t.attempts
                .iter()
                .any(|a| a.succeeded && a.participant_id == participant_id && a.code_id == code_id)
        {
            return Err(LoyaltyError::ConcurrencyConflict);
        }

        let id = t.id();
        t.attempts.push(ScanAttempt {
            id,
            participant_id,
            code_id,
            attempted_at,
            succeeded,
        });
        Ok(())
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryStore {
    async fn create(&self, participant: &NewParticipant) -> Result<Participant> {
        let mut t = self.tables.lock();
        if t.participants
            .values()
            .any(|p| p.external_id == participant.external_id)
        {
            return Err(LoyaltyError::Validation(format!(
                "external_id 已存在: {}",
                participant.external_id
            )));
        }

        let id = t.id();
        let row = Participant {
            id,
            external_id: participant.external_id,
            username: participant.username.clone(),
            first_name: participant.first_name.clone(),
            last_name: participant.last_name.clone(),
            phone_number: participant.phone_number.clone(),
            language: participant.language.clone(),
            region: participant.region.clone(),
            kind: participant.kind,
            balance: 0,
            is_active: true,
            last_contacted_at: None,
            deactivated_at: None,
            created_at: Utc::now(),
        };
        t.participants.insert(id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Participant>> {
        Ok(self.tables.lock().participants.get(&id).cloned())
    }

    async fn get_by_external_id(&self, external_id: i64) -> Result<Option<Participant>> {
        let t = self.tables.lock();
        Ok(t.participants
            .values()
            .find(|p| p.external_id == external_id)
            .cloned())
    }

    async fn claim_kind(&self, id: i64, kind: ParticipantKind) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.participants.get_mut(&id) {
            Some(p) if p.kind.is_none() => {
                p.kind = Some(kind);
                Ok(true)
            }
            Some(p) => Ok(p.kind == Some(kind)),
            None => Ok(false),
        }
    }

    async fn update_cached_balance(&self, id: i64, balance: i64) -> Result<()> {
        if let Some(p) = self.tables.lock().participants.get_mut(&id) {
            p.balance = balance;
        }
        Ok(())
    }

    async fn deactivate(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.participants.get_mut(&id) {
            Some(p) if p.is_active => {
                p.is_active = false;
                p.deactivated_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reactivate(&self, id: i64) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.participants.get_mut(&id) {
            Some(p) if !p.is_active => {
                p.is_active = true;
                p.deactivated_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_contacted(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        if let Some(p) = self.tables.lock().participants.get_mut(&id) {
            p.last_contacted_at = Some(now);
        }
        Ok(())
    }

    async fn list_matching_ids(&self, filter: &RecipientFilter) -> Result<Vec<i64>> {
        let t = self.tables.lock();
        Ok(t.participants
            .values()
            .filter(|p| filter.matches(p))
            .map(|p| p.id)
            .collect())
    }

    async fn top_by_balance(&self, limit: i64) -> Result<Vec<Participant>> {
        let t = self.tables.lock();
        let mut rows: Vec<Participant> = t
            .participants
            .values()
            .filter(|p| p.balance > 0)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.id.cmp(&b.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl RedemptionRepository for InMemoryStore {
    async fn create_gift(&self, gift: &NewGift) -> Result<Gift> {
        let mut t = self.tables.lock();
        let id = t.id();
        let row = Gift {
            id,
            name: gift.name.clone(),
            description: gift.description.clone(),
            points_cost: gift.points_cost,
            kind: gift.kind,
            is_active: true,
        };
        t.gifts.insert(id, row.clone());
        Ok(row)
    }

    async fn get_gift(&self, id: i64) -> Result<Option<Gift>> {
        Ok(self.tables.lock().gifts.get(&id).cloned())
    }

    async fn update_gift_cost(&self, id: i64, points_cost: i64) -> Result<()> {
        if let Some(g) = self.tables.lock().gifts.get_mut(&id) {
            g.points_cost = points_cost;
        }
        Ok(())
    }

    async fn create_request_if_affordable(
        &self,
        participant_id: i64,
        gift_id: i64,
        points_cost: i64,
        now: DateTime<Utc>,
    ) -> Result<RequestCreation> {
        let mut t = self.tables.lock();
        if !t.participants.contains_key(&participant_id) {
            return Err(LoyaltyError::ParticipantNotFound(participant_id));
        }

        let available = (t.earned(participant_id) - t.committed(participant_id)).max(0);
        if available < points_cost {
            return Ok(RequestCreation::Insufficient { available });
        }

        let id = t.id();
        let row = RedemptionRequest {
            id,
            participant_id,
            gift_id,
            points_cost,
            status: RedemptionStatus::Pending,
            requested_at: now,
            processed_at: None,
            confirmed_at: None,
            user_confirmed: false,
            admin_notes: String::new(),
            user_comment: String::new(),
        };
        t.requests.insert(id, row.clone());
        Ok(RequestCreation::Created(row))
    }

    async fn get_request(&self, id: i64) -> Result<Option<RedemptionRequest>> {
        Ok(self.tables.lock().requests.get(&id).cloned())
    }

    async fn list_requests(&self, participant_id: i64) -> Result<Vec<RedemptionRequest>> {
        let t = self.tables.lock();
        let mut rows: Vec<RedemptionRequest> = t
            .requests
            .values()
            .filter(|r| r.participant_id == participant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn sum_committed_cost(&self, participant_id: i64) -> Result<i64> {
        Ok(self.tables.lock().committed(participant_id))
    }

    async fn apply_status_change(
        &self,
        id: i64,
        change: &StatusChange,
    ) -> Result<Option<RedemptionRequest>> {
        let mut t = self.tables.lock();
        let Some(r) = t.requests.get_mut(&id) else {
            return Ok(None);
        };
        if r.status != change.expected {
            return Ok(None);
        }

        r.status = change.next;
        if r.processed_at.is_none() {
            r.processed_at = change.processed_at;
        }
        if let Some(at) = change.confirmed_at {
            r.confirmed_at = Some(at);
        }
        if let Some(confirmed) = change.user_confirmed {
            r.user_confirmed = confirmed;
        }
        if let Some(notes) = &change.admin_notes {
            r.admin_notes = notes.clone();
        }
        if let Some(comment) = &change.user_comment {
            r.user_comment = comment.clone();
        }
        Ok(Some(r.clone()))
    }

    async fn cancel_pending(
        &self,
        id: i64,
        participant_id: i64,
        requested_after: DateTime<Utc>,
    ) -> Result<Option<RedemptionRequest>> {
        let mut t = self.tables.lock();
        match t.requests.get_mut(&id) {
            Some(r)
                if r.participant_id == participant_id
                    && r.status == RedemptionStatus::Pending
                    && r.requested_at >= requested_after =>
            {
                r.status = RedemptionStatus::CancelledByUser;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn create(&self, job: &NewBulkJob, recipients: &[i64]) -> Result<BulkJob> {
        let mut t = self.tables.lock();
        let id = t.id();
        let row = BulkJob {
            id,
            kind: job.kind,
            payload: job.payload.clone(),
            total_units: job.total_units,
            chunk_size: job.chunk_size,
            status: JobStatus::Pending,
            next_offset: 0,
            produced_count: 0,
            failure_count: 0,
            cancel_requested: false,
            artifact: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            claimed_by: None,
            lease_expires_at: None,
        };
        t.jobs.insert(id, row.clone());

        for (seq, participant_id) in recipients.iter().enumerate() {
            let seq = seq as i64;
            t.recipients.insert(
                (id, seq),
                JobRecipient {
                    job_id: id,
                    seq,
                    participant_id: *participant_id,
                    outcome: None,
                    error: None,
                    processed_at: None,
                },
            );
        }
        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<BulkJob>> {
        Ok(self.tables.lock().jobs.get(&id).cloned())
    }

    async fn claim_next_pending(&self, lease: &JobLease) -> Result<Option<BulkJob>> {
        let mut t = self.tables.lock();
        let job = t
            .jobs
            .values_mut()
            .find(|j| j.status == JobStatus::Pending && !j.cancel_requested);
        Ok(job.map(|j| {
            j.status = JobStatus::Processing;
            j.started_at.get_or_insert(lease.now);
            take_lease(j, lease);
            j.clone()
        }))
    }

    async fn claim_resumable(&self, lease: &JobLease) -> Result<Option<BulkJob>> {
        let mut t = self.tables.lock();
        let job = t.jobs.values_mut().find(|j| {
            matches!(j.status, JobStatus::Processing | JobStatus::Finalizing)
                && j.is_unleased(lease.now)
        });
        Ok(job.map(|j| {
            take_lease(j, lease);
            j.clone()
        }))
    }

    async fn start(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j) if j.status == JobStatus::Pending => {
                j.status = JobStatus::Processing;
                j.started_at.get_or_insert(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn acquire_lease(&self, id: i64, lease: &JobLease) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j)
                if !j.status.is_terminal() && j.lease_available_to(&lease.owner, lease.now) =>
            {
                take_lease(j, lease);
                Ok(true)
            }
            _ => Ok(false),
        }
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
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j)
                if j.status == JobStatus::Processing
                    && j.next_offset == expected_offset
                    && j.claimed_by.as_deref() == Some(lease.owner.as_str()) =>
            {
                j.next_offset = next_offset;
                j.produced_count = produced;
                j.failure_count = failed;
                j.lease_expires_at = Some(lease.expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_counts(&self, id: i64, produced: i64, failed: i64) -> Result<()> {
        if let Some(j) = self.tables.lock().jobs.get_mut(&id) {
            j.produced_count = produced;
            j.failure_count = failed;
        }
        Ok(())
    }

    async fn begin_finalize(&self, id: i64, owner: &str) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j)
                if j.status == JobStatus::Processing
                    && j.next_offset >= j.total_units
                    && j.claimed_by.as_deref() == Some(owner) =>
            {
                j.status = JobStatus::Finalizing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        id: i64,
        artifact: Option<String>,
        produced: i64,
        failed: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j) if j.status == JobStatus::Finalizing => {
                j.status = JobStatus::Completed;
                j.artifact = artifact;
                j.produced_count = produced;
                j.failure_count = failed;
                j.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, id: i64, message: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j) if !j.status.is_terminal() => {
                j.status = JobStatus::Failed;
                j.error_message = Some(message.to_string());
                j.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn request_cancel(&self, id: i64) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j) if !j.status.is_terminal() => {
                j.cancel_requested = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cancelled(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(j) if !j.status.is_terminal() => {
                j.status = JobStatus::Cancelled;
                j.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_recipients(
        &self,
        job_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<JobRecipient>> {
        let t = self.tables.lock();
        Ok(t.recipients
            .range((job_id, start)..(job_id, end))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn record_recipient_outcome(
        &self,
        job_id: i64,
        seq: i64,
        outcome: RecipientOutcome,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut t = self.tables.lock();
        if let Some(r) = t.recipients.get_mut(&(job_id, seq)) {
            if r.outcome.is_none() {
                r.outcome = Some(outcome);
                r.error = error;
                r.processed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn count_outcomes(&self, job_id: i64) -> Result<OutcomeCounts> {
        let t = self.tables.lock();
        let mut counts = OutcomeCounts::default();
        for r in t.recipients.values().filter(|r| r.job_id == job_id) {
            if let Some(outcome) = r.outcome {
                counts.add(outcome, 1);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_code(code: &str, hash: &str, serial: &str) -> NewCode {
        NewCode {
            code: code.to_string(),
            hash: hash.to_string(),
            serial_number: serial.to_string(),
            kind: ParticipantKind::Electrician,
            reward_value: 50,
            job_id: None,
            job_seq: None,
        }
    }

    #[tokio::test]
    async fn test_insert_enforces_uniqueness() {
        let store = InMemoryStore::new();
        let first = store.insert(&new_code("E-AAAA", "0a0a0a0a", "E0000001")).await.unwrap();
        assert!(matches!(first, InsertCodeOutcome::Inserted(_)));

        let dup_code = store.insert(&new_code("E-AAAA", "ffffffff", "E0000002")).await.unwrap();
        assert!(matches!(dup_code, InsertCodeOutcome::DuplicateIdentifier));

        let dup_hash = store.insert(&new_code("E-BBBB", "0a0a0a0a", "E0000002")).await.unwrap();
        assert!(matches!(dup_hash, InsertCodeOutcome::DuplicateIdentifier));

        let dup_serial = store.insert(&new_code("E-BBBB", "0b0b0b0b", "E0000001")).await.unwrap();
        assert!(matches!(dup_serial, InsertCodeOutcome::DuplicateSerial));
    }

    #[tokio::test]
    async fn test_mark_scanned_only_once() {
        let store = InMemoryStore::new();
        let InsertCodeOutcome::Inserted(code) = store
            .insert(&new_code("E-CCCC", "0c0c0c0c", "E0000001"))
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };

        let now = Utc::now();
        assert!(store.mark_scanned(code.id, 1, now).await.unwrap());
        assert!(!store.mark_scanned(code.id, 2, now).await.unwrap());

        let stored = store.find_by_identifier("E-CCCC", "").await.unwrap().unwrap();
        assert_eq!(stored.scanned_by, Some(1));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryStore::new();
        store.inject_code_insert_failures(1);
        let err = store
            .insert(&new_code("E-DDDD", "0d0d0d0d", "E0000001"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(store
            .insert(&new_code("E-DDDD", "0d0d0d0d", "E0000001"))
            .await
            .is_ok());
    }

    fn lease(owner: &str, now: DateTime<Utc>) -> JobLease {
        JobLease {
            owner: owner.to_string(),
            now,
            expires_at: now + chrono::Duration::seconds(60),
        }
    }

    #[tokio::test]
    async fn test_job_lease_is_exclusive_until_expiry() {
        let store = InMemoryStore::new();
        let job = JobRepository::create(
            &store,
            &NewBulkJob {
                kind: crate::models::JobKind::CodeGeneration,
                payload: serde_json::json!({}),
                total_units: 10,
                chunk_size: 5,
            },
            &[],
        )
        .await
        .unwrap();

        let now = Utc::now();
        let claimed = store.claim_next_pending(&lease("a", now)).await.unwrap().unwrap();
        assert_eq!(claimed.claimed_by.as_deref(), Some("a"));

        // 租约有效期内其他执行者既不能续跑也不能推进游标
        assert!(store.claim_resumable(&lease("b", now)).await.unwrap().is_none());
        assert!(!store.acquire_lease(job.id, &lease("b", now)).await.unwrap());
        assert!(!store.advance_cursor(job.id, &lease("b", now), 0, 5, 5, 0).await.unwrap());
        assert!(store.advance_cursor(job.id, &lease("a", now), 0, 5, 5, 0).await.unwrap());

        let later = now + chrono::Duration::seconds(61);
        let taken = store.claim_resumable(&lease("b", later)).await.unwrap().unwrap();
        assert_eq!(taken.claimed_by.as_deref(), Some("b"));
        assert!(!store.advance_cursor(job.id, &lease("a", later), 5, 10, 10, 0).await.unwrap());
        assert!(!store.begin_finalize(job.id, "a").await.unwrap());
    }
}
