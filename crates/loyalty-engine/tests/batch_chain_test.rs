//! 批量任务链式执行集成测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Engine, ScriptedChannel, batch_config, chain_runner, unthrottled};
use loyalty_engine::{
    ChainRunner, ChunkContinuation, Clock, JobPayload, JobStatus, JobWorker, LoyaltyError,
    ParticipantKind, RecipientFilter,
    repository::{CodeRepository, JobRepository},
};
use loyalty_shared::config::BatchConfig;

fn generation(quantity: u64) -> JobPayload {
    JobPayload::Generation {
        kind: ParticipantKind::Electrician,
        reward_value: None,
        quantity,
    }
}

fn runner(engine: &Engine, batch: BatchConfig, dir: &tempfile::TempDir) -> ChainRunner {
    chain_runner(
        engine.store.clone(),
        engine.clock.clone(),
        ScriptedChannel::new(),
        batch,
        unthrottled(),
        dir.path(),
    )
}

// ==================== 分片 ====================

#[tokio::test]
async fn test_generation_chunks_and_single_finalize() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(1000, 500), &dir);

    let job = runner.submit(generation(2500)).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.chunk_count(), 3);
    JobRepository::start(engine.store.as_ref(), job.id, engine.clock.now())
        .await
        .unwrap();

    let mut continuation = Some(ChunkContinuation {
        job_id: job.id,
        next_offset: 0,
    });
    let mut offsets = Vec::new();
    let mut produced = Vec::new();
    while let Some(current) = continuation {
        continuation = runner.run_chunk(current).await.unwrap();
        if let Some(next) = continuation {
            offsets.push(next.next_offset);
            produced.push(engine.store.count_by_job(job.id).await.unwrap());
        }
    }

    assert_eq!(offsets, vec![1000, 2000, 2500]);
    assert_eq!(produced, vec![1000, 2000, 2500]);

    let done = runner.status(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.produced_count, 2500);
    assert_eq!(done.failure_count, 0);
    assert_eq!(engine.store.code_count(), 2500);

    let artifact = done.artifact.expect("artifact");
    let manifest = std::fs::read_to_string(&artifact).unwrap();
    assert_eq!(manifest.lines().count(), 2501);

    // 终态任务不再执行
    let replay = runner
        .run_chunk(ChunkContinuation {
            job_id: job.id,
            next_offset: 2500,
        })
        .await
        .unwrap();
    assert!(replay.is_none());
    assert!(matches!(
        runner.run(job.id).await,
        Err(LoyaltyError::JobNotRunnable { .. })
    ));
}

#[tokio::test]
async fn test_small_job_runs_in_one_pass() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(1000, 500), &dir);

    let job = runner.submit(generation(40)).await.unwrap();
    assert_eq!(job.chunk_count(), 1);

    let done = runner.run(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.produced_count, 40);
    assert_eq!(done.next_offset, 40);
}

#[tokio::test]
async fn test_resume_after_restart_continues_from_cursor() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let first = runner(&engine, batch_config(100, 500), &dir);

    let job = first.submit(generation(250)).await.unwrap();
    JobRepository::start(engine.store.as_ref(), job.id, engine.clock.now())
        .await
        .unwrap();
    first
        .run_chunk(ChunkContinuation {
            job_id: job.id,
            next_offset: 0,
        })
        .await
        .unwrap();
    drop(first);

    let progress = JobRepository::get(engine.store.as_ref(), job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, JobStatus::Processing);
    assert_eq!(progress.next_offset, 100);

    // 旧执行者的租约未过期前，新执行者不能接手
    let second = runner(&engine, batch_config(100, 500), &dir);
    assert!(matches!(
        second.run(job.id).await,
        Err(LoyaltyError::JobLeaseHeld { .. })
    ));
    assert_eq!(engine.store.code_count(), 100);

    engine.clock.advance(chrono::Duration::seconds(301));
    let done = second.run(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.produced_count, 250);
    assert_eq!(engine.store.code_count(), 250);
}

// ==================== 失败与重试 ====================

#[tokio::test]
async fn test_transient_chunk_errors_are_retried() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(10, 500), &dir);

    let job = runner.submit(generation(25)).await.unwrap();
    engine.store.inject_code_insert_failures(2);

    let done = runner.run(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.produced_count, 25);
    assert_eq!(engine.store.code_count(), 25);
}

#[tokio::test]
async fn test_persistent_chunk_errors_fail_the_job() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(
        &engine,
        BatchConfig {
            chunk_max_retries: 2,
            ..batch_config(10, 500)
        },
        &dir,
    );

    let job = runner.submit(generation(25)).await.unwrap();
    engine.store.inject_code_insert_failures(100);

    let done = runner.run(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_message.unwrap().contains("[0, 10)"));
    assert_eq!(engine.store.code_count(), 0);
}

#[tokio::test]
async fn test_submit_validation() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(10, 500), &dir);

    assert!(matches!(
        runner.submit(generation(0)).await,
        Err(LoyaltyError::Validation(_))
    ));
    assert!(matches!(
        runner
            .submit(JobPayload::Generation {
                kind: ParticipantKind::Seller,
                reward_value: Some(-1),
                quantity: 5,
            })
            .await,
        Err(LoyaltyError::Validation(_))
    ));
    assert!(matches!(
        runner
            .submit(JobPayload::Delivery {
                text: " ".into(),
                attachment: None,
                filter: RecipientFilter::default(),
            })
            .await,
        Err(LoyaltyError::Validation(_))
    ));
    assert!(matches!(
        runner.status(9999).await,
        Err(LoyaltyError::JobNotFound(9999))
    ));
}

#[tokio::test]
async fn test_delivery_without_recipients_fails_immediately() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(10, 500), &dir);
    engine.participant(1, Some(ParticipantKind::Electrician)).await;

    let job = runner
        .submit(JobPayload::Delivery {
            text: "hello".into(),
            attachment: None,
            filter: RecipientFilter {
                kind: Some(ParticipantKind::Seller),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.total_units, 0);
    assert!(job.error_message.is_some());
}

// ==================== 取消 ====================

#[tokio::test]
async fn test_cancel_between_chunks() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(10, 500), &dir);

    let job = runner.submit(generation(30)).await.unwrap();
    JobRepository::start(engine.store.as_ref(), job.id, engine.clock.now())
        .await
        .unwrap();
    let next = runner
        .run_chunk(ChunkContinuation {
            job_id: job.id,
            next_offset: 0,
        })
        .await
        .unwrap()
        .unwrap();

    let requested = runner.cancel(job.id).await.unwrap();
    assert!(requested.cancel_requested);
    assert_eq!(requested.status, JobStatus::Processing);

    assert!(runner.run_chunk(next).await.unwrap().is_none());
    let cancelled = runner.status(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(engine.store.count_by_job(job.id).await.unwrap(), 10);

    assert!(matches!(
        runner.cancel(job.id).await,
        Err(LoyaltyError::JobNotRunnable { .. })
    ));
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(10, 500), &dir);

    let job = runner.submit(generation(30)).await.unwrap();
    let cancelled = runner.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    let claimed = engine.store.claim_next_pending(&runner.lease()).await.unwrap();
    assert!(claimed.is_none());
    assert!(matches!(
        runner.run(job.id).await,
        Err(LoyaltyError::JobNotRunnable { .. })
    ));
    assert_eq!(engine.store.code_count(), 0);
}

#[tokio::test]
async fn test_finalizing_job_reports_processing_and_resumes() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&engine, batch_config(10, 500), &dir);

    let job = runner.submit(generation(20)).await.unwrap();
    JobRepository::start(engine.store.as_ref(), job.id, engine.clock.now())
        .await
        .unwrap();
    let mut continuation = Some(ChunkContinuation {
        job_id: job.id,
        next_offset: 0,
    });
    for _ in 0..2 {
        continuation = runner.run_chunk(continuation.unwrap()).await.unwrap();
    }
    assert_eq!(continuation.unwrap().next_offset, 20);

    // 收尾开始后进程退出
    assert!(engine.store.begin_finalize(job.id, runner.owner()).await.unwrap());
    let raw = JobRepository::get(engine.store.as_ref(), job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.status, JobStatus::Finalizing);
    assert_eq!(runner.status(job.id).await.unwrap().status, JobStatus::Processing);

    let done = runner.run(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.produced_count, 20);
}

#[tokio::test]
async fn test_finalize_requires_lease_owner() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let owner = runner(&engine, batch_config(10, 500), &dir);
    let other = runner(&engine, batch_config(10, 500), &dir);

    let job = owner.submit(generation(10)).await.unwrap();
    JobRepository::start(engine.store.as_ref(), job.id, engine.clock.now())
        .await
        .unwrap();
    let next = owner
        .run_chunk(ChunkContinuation {
            job_id: job.id,
            next_offset: 0,
        })
        .await
        .unwrap()
        .unwrap();

    assert!(!engine.store.begin_finalize(job.id, other.owner()).await.unwrap());
    assert!(other.run_chunk(next).await.unwrap().is_none());
    assert_eq!(runner_status(&owner, job.id).await, JobStatus::Processing);

    assert!(owner.run_chunk(next).await.unwrap().is_none());
    assert_eq!(runner_status(&owner, job.id).await, JobStatus::Completed);
}

async fn runner_status(runner: &ChainRunner, job_id: i64) -> JobStatus {
    runner.status(job_id).await.unwrap().status
}

// ==================== Worker ====================

#[tokio::test]
async fn test_job_worker_claims_and_runs_pending_jobs() {
    let engine = Engine::new();
    let dir = tempfile::tempdir().unwrap();
    let batch = batch_config(20, 500);
    let runner = Arc::new(runner(&engine, batch.clone(), &dir));
    let worker = JobWorker::new(runner.clone(), engine.store.clone(), &batch);

    let first = runner.submit(generation(50)).await.unwrap();
    let second = runner.submit(generation(30)).await.unwrap();

    assert!(worker.poll_once().await.unwrap());
    assert!(worker.poll_once().await.unwrap());
    assert!(!worker.poll_once().await.unwrap());

    for _ in 0..200 {
        let a = runner.status(first.id).await.unwrap();
        let b = runner.status(second.id).await.unwrap();
        if a.status.is_terminal() && b.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(runner.status(first.id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(runner.status(second.id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(engine.store.code_count(), 80);
}
