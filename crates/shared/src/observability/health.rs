//! `/health` 端点
//!
//! 指标服务器先于数据库启动，连接池建立后再登记到这里。
//! 未登记数据库时只表示进程存活；登记后数据库不可达返回 503。

use std::sync::{Arc, OnceLock};

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::database::{Database, PoolStatus};

/// 健康检查依赖
#[derive(Default)]
pub struct HealthState {
    database: OnceLock<Database>,
}

impl HealthState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 登记数据库，重复登记时保留第一次的连接池
    pub fn register_database(&self, database: Database) {
        let _ = self.database.set(database);
    }
}

pub(super) async fn handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let database = match state.database.get() {
        Some(db) => Some(db.status().await),
        None => None,
    };
    respond(database)
}

fn respond(database: Option<PoolStatus>) -> (StatusCode, Json<Value>) {
    match database {
        None => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Some(pool) if pool.reachable => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": pool })),
        ),
        Some(pool) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": pool })),
        ),
    }
}
