//! PostgreSQL + Redis 集成测试
//!
//! 需要本地数据库和 Redis，默认忽略。运行方式：
//!   DATABASE_URL=postgres://... REDIS_URL=redis://... \
//!   cargo test --test postgres_integration_test -- --ignored

use std::sync::Arc;
use std::time::Duration;

use loyalty_engine::{
    CodeRegistry, NewGift, NewParticipant, ParticipantKind, PointsLedger, RedemptionService,
    RedemptionStatus, RedisBalanceCache, ScanGovernor, ScanOutcome, ScanRejection, SystemClock,
    repository::{
        ParticipantRepository, PgCodeRepository, PgParticipantRepository, PgRedemptionRepository,
        PgScanAttemptRepository, RedemptionRepository,
    },
};
use loyalty_shared::{
    cache::Cache,
    config::{CodesConfig, DatabaseConfig, RedemptionConfig, RedisConfig, ScanConfig},
    database::Database,
};

struct PgEngine {
    participants: Arc<PgParticipantRepository>,
    redemptions_repo: Arc<PgRedemptionRepository>,
    registry: Arc<CodeRegistry>,
    ledger: Arc<PointsLedger>,
    scans: Arc<ScanGovernor>,
    redemptions: RedemptionService,
}

async fn connect() -> PgEngine {
    let database = DatabaseConfig {
        url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DatabaseConfig::default().url),
        ..Default::default()
    };
    let db = Database::connect(&database)
        .await
        .expect("无法连接数据库，请确保 PostgreSQL 正在运行");
    db.run_migrations().await.expect("迁移失败");

    let redis = RedisConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| RedisConfig::default().url),
        ..Default::default()
    };
    let cache = Arc::new(Cache::new(&redis).expect("无法创建 Redis 客户端"));

    let pool = db.pool().clone();
    let codes = Arc::new(PgCodeRepository::new(pool.clone()));
    let participants = Arc::new(PgParticipantRepository::new(pool.clone()));
    let attempts = Arc::new(PgScanAttemptRepository::new(pool.clone()));
    let redemptions_repo = Arc::new(PgRedemptionRepository::new(pool));
    let clock = Arc::new(SystemClock);

    let registry = Arc::new(CodeRegistry::new(codes.clone(), CodesConfig::default()));
    let ledger = Arc::new(PointsLedger::new(
        codes,
        redemptions_repo.clone(),
        participants.clone(),
        Arc::new(RedisBalanceCache::new(cache)),
        Duration::from_secs(60),
    ));
    let scans = Arc::new(ScanGovernor::new(
        registry.clone(),
        attempts,
        participants.clone(),
        ledger.clone(),
        clock.clone(),
        ScanConfig::default(),
    ));
    let redemptions = RedemptionService::new(
        redemptions_repo.clone(),
        participants.clone(),
        ledger.clone(),
        clock,
        &RedemptionConfig::default(),
    );

    PgEngine {
        participants,
        redemptions_repo,
        registry,
        ledger,
        scans,
        redemptions,
    }
}

/// 生成不与其他测试冲突的外部 ID
fn unique_external_id(offset: i64) -> i64 {
    chrono::Utc::now().timestamp_micros() * 10 + offset
}

async fn participant(engine: &PgEngine, offset: i64, kind: ParticipantKind) -> i64 {
    ParticipantRepository::create(
        engine.participants.as_ref(),
        &NewParticipant {
            external_id: unique_external_id(offset),
            kind: Some(kind),
            ..Default::default()
        },
    )
    .await
    .expect("创建参与者失败")
    .id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_concurrent_scans_against_postgres() {
    let engine = connect().await;
    let code = engine
        .registry
        .create(ParticipantKind::Electrician, Some(25))
        .await
        .expect("创建码失败");

    let mut participants = Vec::new();
    for offset in 0..6 {
        participants.push(participant(&engine, offset, ParticipantKind::Electrician).await);
    }

    let handles: Vec<_> = participants
        .iter()
        .map(|&pid| {
            let scans = engine.scans.clone();
            let identifier = code.code.clone();
            tokio::spawn(async move { scans.scan(pid, &identifier).await.unwrap() })
        })
        .collect();

    let mut credited = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ScanOutcome::Credited { balance, .. } => {
                assert_eq!(balance, 25);
                credited += 1;
            }
            ScanOutcome::Rejected(ScanRejection::AlreadyScanned) => already += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(credited, 1);
    assert_eq!(already, 5);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_request_and_cancel_against_postgres() {
    let engine = connect().await;
    let pid = participant(&engine, 7, ParticipantKind::Seller).await;

    let code = engine
        .registry
        .create(ParticipantKind::Seller, Some(50))
        .await
        .expect("创建码失败");
    assert!(engine.scans.scan(pid, &code.code).await.unwrap().is_credited());

    let gift = engine
        .redemptions_repo
        .create_gift(&NewGift {
            name: "集成测试礼品".into(),
            description: None,
            points_cost: 30,
            kind: None,
        })
        .await
        .expect("创建礼品失败");

    let requested = engine.redemptions.request_gift(pid, gift.id).await.unwrap();
    assert_eq!(requested.balance, 20);

    let cancelled = engine
        .redemptions
        .cancel(requested.request.id, pid)
        .await
        .unwrap();
    assert_eq!(cancelled.request.status, RedemptionStatus::CancelledByUser);
    assert_eq!(cancelled.balance, 50);

    // 缓存失效后重算结果一致
    engine.ledger.invalidate(pid).await;
    assert_eq!(engine.ledger.balance(pid, true).await.unwrap(), 50);
}
