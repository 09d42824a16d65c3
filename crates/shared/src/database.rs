//! PostgreSQL 连接池
//!
//! 积分、兑换与批量任务共用一个连接池。启动时按配置执行迁移，
//! 运行期间由 `/health` 端点读取连接池状态。

use crate::config::DatabaseConfig;
use crate::error::Result;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// 连接池状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// `SELECT 1` 是否成功
    pub reachable: bool,
    /// 当前连接数（含空闲）
    pub connections: u32,
    pub idle: usize,
    pub max_connections: u32,
    pub latency_ms: u64,
}

/// 数据库连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    max_connections: u32,
}

impl Database {
    #[instrument(skip(config), fields(max = config.max_connections, min = config.min_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = Self::pool_options(config).connect(&config.url).await?;
        info!(connections = pool.size(), "数据库连接池已建立");

        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }

    fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 探测数据库并汇总连接池占用
    pub async fn status(&self) -> PoolStatus {
        let started = Instant::now();
        let reachable = match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "数据库探测失败");
                false
            }
        };

        PoolStatus {
            reachable,
            connections: self.pool.size(),
            idle: self.pool.num_idle(),
            max_connections: self.max_connections,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }

    /// 执行仓库根目录 migrations/ 下的迁移
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("数据库迁移完成");
        Ok(())
    }
}
