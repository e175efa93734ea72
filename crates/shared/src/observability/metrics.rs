//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metrics 资源守卫
pub struct MetricsHandle {
    pub addr: SocketAddr,
}

/// 初始化 Prometheus 指标导出
///
/// 在指定端口启动 `/metrics` 抓取端点，需在 tokio 运行时内调用。
pub fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_common_metrics(service_name);
    info!("Metrics server listening on {}", addr);

    Ok(MetricsHandle { addr })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notification_dispatch_total",
        "Total number of notification dispatches by outcome"
    );
    metrics::describe_histogram!(
        "notification_dispatch_duration_seconds",
        "Notification dispatch duration in seconds"
    );
    metrics::describe_counter!(
        "notification_send_attempts_total",
        "Total number of physical sender invocations"
    );
    metrics::describe_counter!(
        "notification_policy_denied_total",
        "Total number of dispatches rejected by policy gates"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次分发结果
#[inline]
pub fn record_dispatch(channel: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "notification_dispatch_total",
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "notification_dispatch_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录一次失败的分发，按错误码区分
#[inline]
pub fn record_dispatch_failure(channel: &str, code: &str) {
    metrics::counter!(
        "notification_dispatch_total",
        "channel" => channel.to_string(),
        "outcome" => code.to_string()
    )
    .increment(1);
}

/// 记录发送器的物理调用次数
#[inline]
pub fn record_send_attempts(channel: &str, attempts: u32) {
    metrics::counter!(
        "notification_send_attempts_total",
        "channel" => channel.to_string()
    )
    .increment(u64::from(attempts));
}

/// 记录策略拒绝
#[inline]
pub fn record_policy_denied(reason: &str) {
    metrics::counter!(
        "notification_policy_denied_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时所有记录都是空操作
        record_dispatch("email", "success", 0.01);
        record_dispatch_failure("email", "FATAL_SEND");
        record_send_attempts("sms", 3);
        record_policy_denied("blacklisted");
    }
}
