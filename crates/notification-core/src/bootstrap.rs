//! 按启动配置装配分发器

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::info;

use notify_shared::cache::Cache;
use notify_shared::config::{AppConfig, ChannelConfig, GateBackend};
use notify_shared::retry::RetryPolicy;

use crate::config_source::StaticConfigSource;
use crate::dispatcher::Dispatcher;
use crate::interceptor::{InterceptorChain, LoggingInterceptor, MetricsInterceptor};
use crate::policy::{
    BlacklistChecker, IdempotencyStore, InMemoryBlacklist, InMemoryIdempotencyStore,
    InMemoryRateLimiter, NoopBlacklist, NoopIdempotencyStore, NoopRateLimiter, RateLimiter,
    RedisIdempotencyStore, RedisRateLimiter,
};
use crate::registry::{SenderRegistry, instantiate};

/// 装配分发器
///
/// 未配置任何渠道时注册全部内置发送器。Redis 后端需要传入 `cache`。
pub fn build_dispatcher(config: &AppConfig, cache: Option<Cache>) -> anyhow::Result<Dispatcher> {
    let dispatch = &config.dispatch;

    let registry = build_registry(&config.channels)?;
    let idempotency: Arc<dyn IdempotencyStore> = match dispatch.idempotency.backend {
        GateBackend::None => Arc::new(NoopIdempotencyStore),
        GateBackend::Memory => Arc::new(InMemoryIdempotencyStore::new(
            dispatch.idempotency.ttl(),
            dispatch.idempotency.in_flight_ttl(),
        )),
        GateBackend::Redis => Arc::new(RedisIdempotencyStore::new(
            require_cache(&cache, "dispatch.idempotency")?,
            dispatch.idempotency.ttl(),
            dispatch.idempotency.in_flight_ttl(),
        )),
    };

    let rate_limit = &dispatch.rate_limit;
    let rate_limiter: Arc<dyn RateLimiter> = match rate_limit.backend {
        GateBackend::None => Arc::new(NoopRateLimiter),
        GateBackend::Memory => Arc::new(InMemoryRateLimiter::new(
            rate_limit.max_requests,
            std::time::Duration::from_secs(rate_limit.window_secs),
        )),
        GateBackend::Redis => Arc::new(RedisRateLimiter::new(
            require_cache(&cache, "dispatch.rate_limit")?,
            rate_limit.max_requests,
            rate_limit.window_secs,
        )),
    };

    let blacklist: Arc<dyn BlacklistChecker> = if dispatch.blacklist.is_empty() {
        Arc::new(NoopBlacklist)
    } else {
        Arc::new(InMemoryBlacklist::from_entries(&dispatch.blacklist))
    };

    let interceptors = InterceptorChain::new()
        .with(Arc::new(LoggingInterceptor))
        .with(Arc::new(MetricsInterceptor));

    info!(
        channels = ?registry.registered_types(),
        idempotency = ?dispatch.idempotency.backend,
        rate_limit = ?rate_limit.backend,
        blacklist_entries = dispatch.blacklist.len(),
        max_attempts = dispatch.retry.max_attempts,
        "分发器装配完成"
    );

    Ok(Dispatcher::builder()
        .registry(Arc::new(registry))
        .config_source(Arc::new(StaticConfigSource::from_channels(&config.channels)))
        .idempotency(idempotency)
        .blacklist(blacklist)
        .rate_limiter(rate_limiter)
        .interceptors(interceptors)
        .retry_policy(RetryPolicy::from(&dispatch.retry))
        .default_template_type(dispatch.default_template_type.clone())
        .build())
}

fn build_registry(channels: &[ChannelConfig]) -> anyhow::Result<SenderRegistry> {
    if channels.is_empty() {
        return Ok(SenderRegistry::with_defaults());
    }

    let registry = SenderRegistry::new();
    for channel in channels.iter().filter(|c| c.enabled) {
        let implementation = channel.sender.as_deref().unwrap_or(channel.channel_type.as_str());
        let sender = instantiate(implementation).with_context(|| {
            format!(
                "渠道 {} 使用了未知的发送器实现 {}",
                channel.channel_type, implementation
            )
        })?;
        registry.register(&channel.channel_type, sender);
    }
    Ok(registry)
}

fn require_cache(cache: &Option<Cache>, section: &str) -> anyhow::Result<Cache> {
    match cache {
        Some(cache) => Ok(cache.clone()),
        None => bail!("{section} 使用 redis 后端，但未提供 Redis 连接"),
    }
}
