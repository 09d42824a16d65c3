//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取；同一端口提供 `/health`。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;
use super::health::{self, HealthState};

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(config: &ObservabilityConfig, health: Arc<HealthState>) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle, health).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册业务指标描述（出现在 /metrics 的 HELP 注释中）
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("scan_attempts_total", "Total number of code scan attempts");
    metrics::describe_counter!(
        "balance_recomputes_total",
        "Total number of ledger balance recomputations"
    );
    metrics::describe_counter!(
        "redemption_transitions_total",
        "Total number of redemption status transitions"
    );
    metrics::describe_counter!("bulk_chunks_total", "Total number of executed bulk job chunks");
    metrics::describe_histogram!(
        "bulk_chunk_duration_seconds",
        "Bulk job chunk duration in seconds"
    );
    metrics::describe_counter!("bulk_jobs_total", "Total number of finished bulk jobs");
    metrics::describe_counter!("deliveries_total", "Total number of message deliveries");
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last worker loop iteration"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
    health: Arc<HealthState>,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(health::handler))
        .with_state(health);

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录扫码结果
#[inline]
pub fn record_scan(outcome: &str) {
    metrics::counter!("scan_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录余额重算
#[inline]
pub fn record_balance_recompute(reconciled: bool) {
    metrics::counter!(
        "balance_recomputes_total",
        "reconciled" => reconciled.to_string()
    )
    .increment(1);
}

/// 记录兑换状态迁移
#[inline]
pub fn record_redemption_transition(from: &str, to: &str) {
    metrics::counter!(
        "redemption_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// 记录批量任务分片执行
#[inline]
pub fn record_bulk_chunk(kind: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "bulk_chunks_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!("bulk_chunk_duration_seconds", "kind" => kind.to_string())
        .record(duration_secs);
}

/// 记录批量任务终态
#[inline]
pub fn record_bulk_job(kind: &str, status: &str) {
    metrics::counter!(
        "bulk_jobs_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录单条投递结果
#[inline]
pub fn record_delivery(outcome: &str) {
    metrics::counter!("deliveries_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}
