//! 幂等存储
//!
//! 记录已完成的逻辑发送，防止同一 request_id 被重复投递。
//! `try_begin` 以原子方式占位，同一时刻只有一个调用方能拿到处理权；
//! 成功后 `put` 转为已完成，非终态失败时 `abandon` 释放占位。
//! `exists` 只报告已完成的记录。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, warn};

use notify_shared::cache::{Cache, CacheKey};
use notify_shared::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// 该键的发送是否已完成
    async fn exists(&self, key: &str) -> Result<bool>;

    /// 标记为已完成
    async fn put(&self, key: &str) -> Result<()>;

    /// 尝试占位，返回 false 表示已完成或正被其他调用方处理
    async fn try_begin(&self, key: &str) -> Result<bool> {
        Ok(!self.exists(key).await?)
    }

    /// 释放未完成的占位
    async fn abandon(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// 不做任何去重
pub struct NoopIdempotencyStore;

#[async_trait]
impl IdempotencyStore for NoopIdempotencyStore {
    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn put(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    InFlight,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    state: EntryState,
    expires_at: Instant,
}

impl Record {
    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// 进程内幂等存储，记录带过期时间，过期后视为不存在
///
/// 占位时顺带清理过期记录，两次清理之间至少间隔较短的那个 TTL。
pub struct InMemoryIdempotencyStore {
    records: DashMap<String, Record>,
    ttl: Duration,
    in_flight_ttl: Duration,
    last_purge: Mutex<Instant>,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl: Duration, in_flight_ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
            in_flight_ttl,
            last_purge: Mutex::new(Instant::now()),
        }
    }

    fn purge_if_due(&self) {
        let now = Instant::now();
        {
            // 其他调用方正在清理时直接跳过
            let Some(mut last) = self.last_purge.try_lock() else {
                return;
            };
            if now.duration_since(*last) < self.ttl.min(self.in_flight_ttl) {
                return;
            }
            *last = now;
        }
        self.purge_expired();
    }

    /// 清理过期记录，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_live());
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, "清理过期幂等记录");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(86_400), Duration::from_secs(300))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .records
            .get(key)
            .is_some_and(|r| r.state == EntryState::Done && r.is_live()))
    }

    async fn put(&self, key: &str) -> Result<()> {
        self.records.insert(
            key.to_string(),
            Record {
                state: EntryState::Done,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn try_begin(&self, key: &str) -> Result<bool> {
        // 必须在持有 entry 锁之前清理，retain 会锁住所有分片
        self.purge_if_due();

        let claim = Record {
            state: EntryState::InFlight,
            expires_at: Instant::now() + self.in_flight_ttl,
        };
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    Ok(false)
                } else {
                    occupied.insert(claim);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(claim);
                Ok(true)
            }
        }
    }

    async fn abandon(&self, key: &str) -> Result<()> {
        self.records
            .remove_if(key, |_, record| record.state == EntryState::InFlight);
        Ok(())
    }
}

/// 基于 Redis 的幂等存储
///
/// 占位与完成记录分两个键：占位使用 SET NX EX，短 TTL 防止进程崩溃后永久占用。
pub struct RedisIdempotencyStore {
    cache: Cache,
    ttl: Duration,
    in_flight_ttl: Duration,
}

impl RedisIdempotencyStore {
    pub fn new(cache: Cache, ttl: Duration, in_flight_ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            in_flight_ttl,
        }
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.cache.exists(&CacheKey::idempotency_done(key)).await
    }

    async fn put(&self, key: &str) -> Result<()> {
        self.cache
            .set(&CacheKey::idempotency_done(key), &1u8, self.ttl)
            .await?;
        self.cache
            .delete(&CacheKey::idempotency_in_flight(key))
            .await
    }

    async fn try_begin(&self, key: &str) -> Result<bool> {
        if self.exists(key).await? {
            return Ok(false);
        }
        let in_flight = CacheKey::idempotency_in_flight(key);
        if !self.cache.set_nx(&in_flight, &1u8, self.in_flight_ttl).await? {
            return Ok(false);
        }
        // put 先写完成键再删占位键，占位成功后再查一次完成键即可排除
        // 两次检查之间其他调用方恰好完成的情况
        if self.exists(key).await? {
            if let Err(e) = self.cache.delete(&in_flight).await {
                warn!(key, error = %e, "释放幂等占位失败");
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn abandon(&self, key: &str) -> Result<()> {
        self.cache
            .delete(&CacheKey::idempotency_in_flight(key))
            .await
    }
}
