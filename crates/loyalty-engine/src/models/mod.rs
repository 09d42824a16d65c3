//! 积分引擎领域模型
//!
//! 包含码、扫码记录、参与者、礼品兑换以及批量任务的实体定义

pub mod code;
pub mod enums;
pub mod job;
pub mod participant;
pub mod redemption;

pub use code::{Code, NewCode, ScanAttempt};
pub use enums::{
    JobKind, JobStatus, OperatorRole, ParticipantKind, RecipientOutcome, RedemptionStatus,
};
pub use job::{
    BulkJob, ChunkContinuation, JobLease, JobPayload, JobRecipient, NewBulkJob, OutcomeCounts,
    RecipientFilter,
};
pub use participant::{LeaderboardEntry, NewParticipant, Participant};
pub use redemption::{Gift, NewGift, RedemptionRequest, StatusChange};
