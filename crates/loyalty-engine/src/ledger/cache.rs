//! 余额缓存
//!
//! 键为 `balance:{participant_id}`，值为整数余额

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use loyalty_shared::cache::{Cache, CacheKey};
use tokio::time::Instant;

use crate::error::Result;

/// 余额缓存接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn get(&self, participant_id: i64) -> Result<Option<i64>>;
    async fn set(&self, participant_id: i64, balance: i64, ttl: Duration) -> Result<()>;
    async fn delete(&self, participant_id: i64) -> Result<()>;
}

/// Redis 余额缓存
pub struct RedisBalanceCache {
    cache: Arc<Cache>,
}

impl RedisBalanceCache {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl BalanceCache for RedisBalanceCache {
    async fn get(&self, participant_id: i64) -> Result<Option<i64>> {
        Ok(self.cache.get::<i64>(&CacheKey::balance(participant_id)).await?)
    }

    async fn set(&self, participant_id: i64, balance: i64, ttl: Duration) -> Result<()> {
        Ok(self
            .cache
            .set(&CacheKey::balance(participant_id), &balance, ttl)
            .await?)
    }

    async fn delete(&self, participant_id: i64) -> Result<()> {
        Ok(self.cache.delete(&CacheKey::balance(participant_id)).await?)
    }
}

/// 进程内余额缓存（测试及无 Redis 的本地运行）
///
/// 过期判断使用 tokio 时钟，`start_paused` 测试中可推进时间
#[derive(Default)]
pub struct MemoryBalanceCache {
    entries: DashMap<i64, (i64, Instant)>,
}

impl MemoryBalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, participant_id: i64) -> bool {
        self.entries
            .get(&participant_id)
            .is_some_and(|e| e.1 > Instant::now())
    }
}

#[async_trait]
impl BalanceCache for MemoryBalanceCache {
    async fn get(&self, participant_id: i64) -> Result<Option<i64>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(&participant_id)
            .and_then(|e| (e.1 > now).then_some(e.0));
        if hit.is_none() {
            self.entries.remove_if(&participant_id, |_, e| e.1 <= now);
        }
        Ok(hit)
    }

    async fn set(&self, participant_id: i64, balance: i64, ttl: Duration) -> Result<()> {
        self.entries
            .insert(participant_id, (balance, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, participant_id: i64) -> Result<()> {
        self.entries.remove(&participant_id);
        Ok(())
    }
}
