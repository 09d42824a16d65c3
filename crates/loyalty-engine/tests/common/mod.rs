//! 集成测试公共装配
//!
//! 全部服务基于内存仓储、内存余额缓存与固定时钟组装，无需外部依赖

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use loyalty_engine::{
    ChainRunner, CodeRegistry, DeliveryOutcome, DeliveryPipeline, DeliveryWorker, FixedClock,
    GenerationWorker, InMemoryStore, MemoryBalanceCache, MessagingChannel, NewGift,
    NewParticipant, ParticipantKind, PointsLedger, RedemptionService, ScanGovernor,
    WorkerRegistry,
    repository::{ParticipantRepository, RedemptionRepository},
};
use loyalty_shared::config::{
    BatchConfig, CodesConfig, DeliveryConfig, RedemptionConfig, ScanConfig,
};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

pub struct Engine {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub cache: Arc<MemoryBalanceCache>,
    pub registry: Arc<CodeRegistry>,
    pub ledger: Arc<PointsLedger>,
    pub scans: Arc<ScanGovernor>,
    pub redemptions: RedemptionService,
}

impl Engine {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(base_time()));
        let cache = Arc::new(MemoryBalanceCache::new());

        let registry = Arc::new(CodeRegistry::new(store.clone(), CodesConfig::default()));
        let ledger = Arc::new(PointsLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
            cache.clone(),
            Duration::from_secs(60),
        ));
        let scans = Arc::new(ScanGovernor::new(
            registry.clone(),
            store.clone(),
            store.clone(),
            ledger.clone(),
            clock.clone(),
            ScanConfig::default(),
        ));
        let redemptions = RedemptionService::new(
            store.clone(),
            store.clone(),
            ledger.clone(),
            clock.clone(),
            &RedemptionConfig::default(),
        );

        Self {
            store,
            clock,
            cache,
            registry,
            ledger,
            scans,
            redemptions,
        }
    }

    pub async fn participant(&self, external_id: i64, kind: Option<ParticipantKind>) -> i64 {
        ParticipantRepository::create(
            self.store.as_ref(),
            &NewParticipant {
                external_id,
                kind,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
    }

    pub async fn gift(&self, points_cost: i64, kind: Option<ParticipantKind>) -> i64 {
        self.store
            .create_gift(&NewGift {
                name: format!("gift-{}", points_cost),
                description: None,
                points_cost,
                kind,
            })
            .await
            .unwrap()
            .id
    }
}

/// 组装批量任务执行器
pub fn chain_runner(
    store: Arc<InMemoryStore>,
    clock: Arc<FixedClock>,
    channel: Arc<dyn MessagingChannel>,
    batch: BatchConfig,
    delivery: DeliveryConfig,
    artifact_dir: &Path,
) -> ChainRunner {
    let registry = Arc::new(CodeRegistry::new(store.clone(), CodesConfig::default()));
    let pipeline = Arc::new(DeliveryPipeline::new(
        store.clone(),
        store.clone(),
        channel,
        clock.clone(),
        &delivery,
    ));

    let mut workers = WorkerRegistry::new();
    workers
        .register(Arc::new(GenerationWorker::new(
            registry,
            store.clone(),
            artifact_dir,
        )))
        .register(Arc::new(DeliveryWorker::new(pipeline, store.clone())));

    ChainRunner::new(store.clone(), store, workers, clock, batch)
}

/// 测试用批量配置：重试间隔 1ms
pub fn batch_config(generation_chunk_size: u64, delivery_chunk_size: u64) -> BatchConfig {
    BatchConfig {
        generation_chunk_size,
        delivery_chunk_size,
        chunk_max_retries: 3,
        chunk_retry_initial_delay_ms: 1,
        ..Default::default()
    }
}

/// 不限速的投递配置
pub fn unthrottled() -> DeliveryConfig {
    DeliveryConfig {
        max_rate_per_second: 0.0,
        checkpoint_every: 2,
        ..Default::default()
    }
}

/// 按外部 ID 预设结果的测试渠道，记录每一次发送
#[derive(Default)]
pub struct ScriptedChannel {
    outcomes: parking_lot::Mutex<std::collections::HashMap<i64, DeliveryOutcome>>,
    sent: parking_lot::Mutex<Vec<i64>>,
}

impl ScriptedChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, recipient: i64, outcome: DeliveryOutcome) {
        self.outcomes.lock().insert(recipient, outcome);
    }

    pub fn sent(&self) -> Vec<i64> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, recipient: i64) -> usize {
        self.sent.lock().iter().filter(|r| **r == recipient).count()
    }
}

#[async_trait::async_trait]
impl MessagingChannel for ScriptedChannel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        recipient: i64,
        _text: &str,
        _attachment: Option<String>,
    ) -> loyalty_engine::Result<DeliveryOutcome> {
        self.sent.lock().push(recipient);
        Ok(self
            .outcomes
            .lock()
            .get(&recipient)
            .cloned()
            .unwrap_or(DeliveryOutcome::Delivered))
    }
}
