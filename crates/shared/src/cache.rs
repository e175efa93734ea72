//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和策略门所需的原子操作封装。

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, instrument};

use crate::config::RedisConfig;
use crate::error::{Result, SharedError};

/// Redis 缓存客户端
///
/// 内部持有一个自动重连的 `ConnectionManager`，克隆后共享同一条多路复用连接。
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    /// 建立 Redis 连接
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis connection manager created");
        Ok(Self { conn })
    }

    fn get_conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(SharedError::from)
    }

    /// 获取值
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_conn();
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// 设置值
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn();
        let serialized = serde_json::to_string(value)?;

        let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
        Ok(())
    }

    /// 删除值
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// 检查键是否存在
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_conn();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// 原子性地仅在 key 不存在时设置值，并指定 TTL
    ///
    /// 基于 Redis SET NX EX 实现，适用于分布式幂等检查和互斥控制。
    /// 返回 true 表示设置成功（key 不存在），false 表示 key 已存在。
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn();
        let serialized = serde_json::to_string(value)?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// 增量操作
    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.get_conn();
        let result: i64 = conn.incr(key, delta).await?;
        Ok(result)
    }

    /// 设置过期时间
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn();
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 已完成发送的幂等记录
    pub fn idempotency_done(scope_key: &str) -> String {
        format!("notify:idem:done:{}", scope_key)
    }

    /// 处理中的幂等占位
    pub fn idempotency_in_flight(scope_key: &str) -> String {
        format!("notify:idem:inflight:{}", scope_key)
    }

    /// 固定窗口限流计数器，window 为窗口序号
    pub fn rate_limit(scope_key: &str, window: u64) -> String {
        format!("notify:rl:{}:{}", scope_key, window)
    }
}
