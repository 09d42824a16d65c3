//! 数据库仓储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 所有"只允许发生一次"的状态变更都是单行条件更新，返回是否生效
//! - 服务层只依赖 trait，PostgreSQL 实现用于生产，内存实现用于测试和本地运行

mod code_repo;
mod job_repo;
pub mod memory;
mod participant_repo;
mod redemption_repo;
mod scan_attempt_repo;
mod traits;

pub use code_repo::PgCodeRepository;
pub use job_repo::PgJobRepository;
pub use memory::InMemoryStore;
pub use participant_repo::PgParticipantRepository;
pub use redemption_repo::PgRedemptionRepository;
pub use scan_attempt_repo::PgScanAttemptRepository;
pub use traits::*;

/// PostgreSQL 唯一约束冲突时返回违反的约束名
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}
