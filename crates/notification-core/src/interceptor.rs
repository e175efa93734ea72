//! 发送拦截器
//!
//! 拦截器按注册顺序在发送前后被调用，用于日志、指标等旁路逻辑。
//! 拦截器返回的错误或 panic 都只记录日志，不会改变分发结果。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, warn};

use notify_shared::observability::metrics;

use crate::error::DispatchError;
use crate::types::{SendRequest, SendResult};

#[async_trait]
pub trait SendInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn before_send(&self, _request: &SendRequest) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_send(&self, _request: &SendRequest, _result: &SendResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_error(&self, _request: &SendRequest, _error: &DispatchError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 有序的拦截器链
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn SendInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn SendInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn with(mut self, interceptor: Arc<dyn SendInterceptor>) -> Self {
        self.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub async fn before_send(&self, request: &SendRequest) {
        for interceptor in &self.interceptors {
            observe(
                interceptor.name(),
                "before_send",
                interceptor.before_send(request),
            )
            .await;
        }
    }

    pub async fn after_send(&self, request: &SendRequest, result: &SendResult) {
        for interceptor in &self.interceptors {
            observe(
                interceptor.name(),
                "after_send",
                interceptor.after_send(request, result),
            )
            .await;
        }
    }

    pub async fn on_error(&self, request: &SendRequest, err: &DispatchError) {
        for interceptor in &self.interceptors {
            observe(
                interceptor.name(),
                "on_error",
                interceptor.on_error(request, err),
            )
            .await;
        }
    }
}

async fn observe<F>(name: &str, hook: &str, fut: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(interceptor = name, hook, error = %e, "拦截器执行失败，已忽略"),
        Err(_) => error!(interceptor = name, hook, "拦截器 panic，已忽略"),
    }
}

/// 记录每次发送的开始与结果
pub struct LoggingInterceptor;

#[async_trait]
impl SendInterceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before_send(&self, request: &SendRequest) -> anyhow::Result<()> {
        info!(
            request_id = %request.request_id,
            channel = %request.channel_type,
            target = %request.target,
            "开始发送通知"
        );
        Ok(())
    }

    async fn after_send(&self, request: &SendRequest, result: &SendResult) -> anyhow::Result<()> {
        info!(
            request_id = %request.request_id,
            channel = %request.channel_type,
            transaction_id = ?result.transaction_id,
            attempts = result.attempts,
            duration_ms = result.duration_ms,
            "通知发送成功"
        );
        Ok(())
    }

    async fn on_error(&self, request: &SendRequest, err: &DispatchError) -> anyhow::Result<()> {
        warn!(
            request_id = %request.request_id,
            channel = %request.channel_type,
            stage = %err.stage,
            code = err.code(),
            error = %err.kind,
            "通知发送失败"
        );
        Ok(())
    }
}

/// 按渠道记录发送结果指标
pub struct MetricsInterceptor;

#[async_trait]
impl SendInterceptor for MetricsInterceptor {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn after_send(&self, request: &SendRequest, result: &SendResult) -> anyhow::Result<()> {
        metrics::record_dispatch(
            &request.channel_type,
            "success",
            result.duration_ms as f64 / 1000.0,
        );
        Ok(())
    }

    async fn on_error(&self, request: &SendRequest, err: &DispatchError) -> anyhow::Result<()> {
        metrics::record_dispatch_failure(&request.channel_type, err.code());
        Ok(())
    }
}
