//! 分片执行器 Trait 与注册表

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::models::{BulkJob, JobKind};

/// 任务进度，由持久化的单元行派生而非累加
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub produced: i64,
    pub failed: i64,
}

/// 分片执行器
///
/// 每种任务类型一个实现，由 `ChainRunner` 按分片驱动。
///
/// - `execute`: 处理 `[start, end)` 区间的单元，重放时必须跳过已完成单元
/// - `progress`: 从持久化数据重新统计任务进度
/// - `finalize`: 最后一个分片完成后调用一次，返回结果产物引用
#[async_trait]
pub trait ChunkWorker: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn execute(&self, job: &BulkJob, start: i64, end: i64) -> Result<()>;

    async fn progress(&self, job: &BulkJob) -> Result<JobProgress>;

    async fn finalize(&self, job: &BulkJob) -> Result<Option<String>>;
}

/// 执行器注册表，按任务类型路由
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<JobKind, Arc<dyn ChunkWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册执行器，同类型已存在时替换
    pub fn register(&mut self, worker: Arc<dyn ChunkWorker>) -> &mut Self {
        let kind = worker.kind();
        debug!(kind = %kind, "注册分片执行器");
        self.workers.insert(kind, worker);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn ChunkWorker>> {
        self.workers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.workers.contains_key(&kind)
    }
}
