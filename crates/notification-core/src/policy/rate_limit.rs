//! 固定窗口限流
//!
//! 以 租户 + 渠道 + 目标 为维度计数，每个窗口内最多允许 `max_requests` 次发送。
//! `acquire` 在放行时原子地占用一个名额，发送失败时 `release` 归还，
//! 因此只有成功的发送会消耗配额。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use notify_shared::cache::{Cache, CacheKey};
use notify_shared::error::Result;

use crate::types::SendRequest;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 占用当前窗口的一个名额，返回 false 表示名额已用完
    async fn acquire(&self, request: &SendRequest) -> Result<bool>;

    /// 归还 `acquire` 占用的名额
    async fn release(&self, request: &SendRequest) -> Result<()>;
}

/// 限流维度键
pub fn rate_key(request: &SendRequest) -> String {
    format!(
        "{}:{}:{}",
        request.tenant_id.as_deref().unwrap_or("-"),
        request.channel_type.trim().to_lowercase(),
        request.target.trim().to_lowercase()
    )
}

pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn acquire(&self, _request: &SendRequest) -> Result<bool> {
        Ok(true)
    }

    async fn release(&self, _request: &SendRequest) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// 进程内限流，过期窗口在占用名额时按窗口长度为周期清理
pub struct InMemoryRateLimiter {
    max_requests: u64,
    window: Duration,
    windows: DashMap<String, Window>,
    last_purge: Mutex<Instant>,
}

impl InMemoryRateLimiter {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
            last_purge: Mutex::new(Instant::now()),
        }
    }

    fn is_current(&self, window: &Window, now: Instant) -> bool {
        now.duration_since(window.started) < self.window
    }

    /// 清理已过期的窗口，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| self.is_current(window, now));
        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            debug!(purged, "清理过期限流窗口");
        }
        purged
    }

    fn purge_if_due(&self, now: Instant) {
        {
            let Some(mut last) = self.last_purge.try_lock() else {
                return;
            };
            if now.duration_since(*last) < self.window {
                return;
            }
            *last = now;
        }
        self.purge_expired();
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn acquire(&self, request: &SendRequest) -> Result<bool> {
        let now = Instant::now();
        self.purge_if_due(now);

        let mut window = self.windows.entry(rate_key(request)).or_insert(Window {
            started: now,
            count: 0,
        });
        if !self.is_current(&window, now) {
            *window = Window {
                started: now,
                count: 0,
            };
        }
        if window.count >= self.max_requests {
            return Ok(false);
        }
        window.count += 1;
        Ok(true)
    }

    async fn release(&self, request: &SendRequest) -> Result<()> {
        let now = Instant::now();
        if let Some(mut window) = self.windows.get_mut(&rate_key(request)) {
            if self.is_current(&window, now) {
                window.count = window.count.saturating_sub(1);
            }
        }
        Ok(())
    }
}

/// 基于 Redis 的固定窗口限流，多实例共享计数
pub struct RedisRateLimiter {
    cache: Cache,
    max_requests: u64,
    window_secs: u64,
}

impl RedisRateLimiter {
    pub fn new(cache: Cache, max_requests: u64, window_secs: u64) -> Self {
        Self {
            cache,
            max_requests,
            window_secs: window_secs.max(1),
        }
    }

    fn window_key(&self, request: &SendRequest) -> String {
        let window = Utc::now().timestamp().max(0) as u64 / self.window_secs;
        CacheKey::rate_limit(&rate_key(request), window)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn acquire(&self, request: &SendRequest) -> Result<bool> {
        let key = self.window_key(request);
        let count = self.cache.incr(&key, 1).await?;
        if count == 1 {
            self.cache
                .expire(&key, Duration::from_secs(self.window_secs))
                .await?;
        }
        if count > self.max_requests as i64 {
            // 超额的占用立即退回
            self.cache.incr(&key, -1).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn release(&self, request: &SendRequest) -> Result<()> {
        let key = self.window_key(request);
        // 跨窗口归还时新窗口的键还不存在，负数计数直接删除
        if self.cache.incr(&key, -1).await? < 0 {
            self.cache.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(target: &str) -> SendRequest {
        SendRequest::new("r1", "sms", target, "hi")
    }

    #[test]
    fn test_rate_key_dimensions() {
        assert_eq!(rate_key(&request("138")), "-:sms:138");
        assert_eq!(
            rate_key(&SendRequest::new("r1", "EMAIL", "A@x.com", "hi").with_tenant("t1")),
            "t1:email:a@x.com"
        );
    }

    #[tokio::test]
    async fn test_in_memory_limit_per_target() {
        let limiter = InMemoryRateLimiter::new(2, Duration::from_secs(60));
        let a = request("a");

        assert!(limiter.acquire(&a).await.unwrap());
        assert!(limiter.acquire(&a).await.unwrap());
        assert!(!limiter.acquire(&a).await.unwrap());

        assert!(limiter.acquire(&request("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_returns_slot() {
        let limiter = InMemoryRateLimiter::new(1, Duration::from_secs(60));
        let a = request("a");

        assert!(limiter.acquire(&a).await.unwrap());
        assert!(!limiter.acquire(&a).await.unwrap());
        limiter.release(&a).await.unwrap();
        assert!(limiter.acquire(&a).await.unwrap());

        // 未占用过名额的维度归还不会产生负数
        limiter.release(&request("b")).await.unwrap();
        assert!(limiter.acquire(&request("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_window_resets() {
        let limiter = InMemoryRateLimiter::new(1, Duration::from_millis(30));
        let a = request("a");

        assert!(limiter.acquire(&a).await.unwrap());
        assert!(!limiter.acquire(&a).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.acquire(&a).await.unwrap());
        assert!(!limiter.acquire(&a).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_respects_quota() {
        let limiter = Arc::new(InMemoryRateLimiter::new(3, Duration::from_secs(60)));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire(&request("a")).await.unwrap() })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);
    }

    #[tokio::test]
    async fn test_stale_windows_are_purged() {
        let limiter = InMemoryRateLimiter::new(5, Duration::from_millis(10));
        for i in 0..100 {
            assert!(limiter.acquire(&request(&format!("t{i}"))).await.unwrap());
        }

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(limiter.acquire(&request("fresh")).await.unwrap());
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_quota_denies_everything() {
        let limiter = InMemoryRateLimiter::new(0, Duration::from_secs(60));
        assert!(!limiter.acquire(&request("a")).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "需要 Redis"]
    async fn test_redis_acquire_and_release() {
        let config = notify_shared::config::RedisConfig {
            url: std::env::var("TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/1".to_string()),
        };
        let cache = Cache::connect(&config).await.unwrap();
        let limiter = RedisRateLimiter::new(cache, 2, 60);
        let target = request(&uuid::Uuid::new_v4().to_string());

        assert!(limiter.acquire(&target).await.unwrap());
        assert!(limiter.acquire(&target).await.unwrap());
        assert!(!limiter.acquire(&target).await.unwrap());
        limiter.release(&target).await.unwrap();
        assert!(limiter.acquire(&target).await.unwrap());
    }
}
