//! 发送前的策略门
//!
//! 分发器按黑名单 → 限流 → 幂等的顺序检查，每个门都有空实现、
//! 进程内实现与 Redis 实现（黑名单只有进程内实现）。

pub mod blacklist;
pub mod idempotency;
pub mod rate_limit;

pub use blacklist::{BlacklistChecker, InMemoryBlacklist, NoopBlacklist};
pub use idempotency::{
    IdempotencyStore, InMemoryIdempotencyStore, NoopIdempotencyStore, RedisIdempotencyStore,
};
pub use rate_limit::{InMemoryRateLimiter, NoopRateLimiter, RateLimiter, RedisRateLimiter};
