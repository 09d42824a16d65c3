//! 积分引擎后台进程
//!
//! 连接数据库，装配批量任务执行器并运行 Worker，直到收到停机信号。
//! 停机时执行中的任务不等待完成，下次启动从游标续跑。

use std::sync::Arc;

use loyalty_engine::{
    ChainRunner, Clock, CodeRegistry, DeliveryPipeline, DeliveryWorker, GenerationWorker,
    HttpBotChannel, JobWorker, LoggingChannel, MessagingChannel, SystemClock, WorkerRegistry,
    repository::{PgCodeRepository, PgJobRepository, PgParticipantRepository},
};
use loyalty_shared::{config::AppConfig, database::Database, observability};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("loyalty-engine").unwrap_or_default();

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting loyalty-engine");

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    guard.register_database(&db);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codes = Arc::new(PgCodeRepository::new(db.pool().clone()));
    let participants = Arc::new(PgParticipantRepository::new(db.pool().clone()));
    let jobs = Arc::new(PgJobRepository::new(db.pool().clone()));

    let registry = Arc::new(CodeRegistry::new(codes.clone(), config.codes.clone()));

    let channel: Arc<dyn MessagingChannel> = match HttpBotChannel::new(&config.delivery) {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            warn!(error = %e, "机器人渠道不可用，使用日志渠道");
            Arc::new(LoggingChannel)
        }
    };
    let pipeline = Arc::new(DeliveryPipeline::new(
        participants.clone(),
        jobs.clone(),
        channel,
        clock.clone(),
        &config.delivery,
    ));

    let mut workers = WorkerRegistry::new();
    workers
        .register(Arc::new(GenerationWorker::new(
            registry,
            codes,
            &config.batch.artifact_dir,
        )))
        .register(Arc::new(DeliveryWorker::new(pipeline, jobs.clone())));

    let runner = Arc::new(ChainRunner::new(
        jobs.clone(),
        participants,
        workers,
        clock.clone(),
        config.batch.clone(),
    ));
    let worker = JobWorker::new(runner, jobs, &config.batch);

    info!(
        generation_chunk_size = config.batch.generation_chunk_size,
        delivery_chunk_size = config.batch.delivery_chunk_size,
        "Services initialized"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    handle.await?;

    db.close().await;
    info!("loyalty-engine shutdown complete");
    Ok(())
}

/// 等待 SIGTERM 或 Ctrl+C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "监听 Ctrl+C 失败");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "监听 SIGTERM 失败"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
