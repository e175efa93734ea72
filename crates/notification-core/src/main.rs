//! 通知工作者
//!
//! 按配置装配分发核心并常驻运行，收到停止信号后释放全部发送器。

use anyhow::Context;
use tracing::info;

use notification_core::bootstrap;
use notify_shared::cache::Cache;
use notify_shared::config::AppConfig;
use notify_shared::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = AppConfig::load("notification-worker").context("加载配置失败")?;
    let _guard = observability::init(&config.service_name, &config.observability)?;

    info!(
        environment = %config.environment,
        "Starting notification-worker..."
    );

    let cache = if config.requires_redis() {
        let cache = Cache::connect(&config.redis).await.context("Redis 连接失败")?;
        cache.health_check().await.context("Redis 连接检查失败")?;
        Some(cache)
    } else {
        None
    };

    let dispatcher = bootstrap::build_dispatcher(&config, cache)?;
    info!(
        channels = ?dispatcher.registry().registered_types(),
        "通知分发核心已就绪"
    );

    tokio::signal::ctrl_c().await?;
    info!("收到停止信号，开始释放发送器");
    dispatcher.shutdown().await;

    Ok(())
}
