//! 通知分发器
//!
//! 串联一次逻辑发送的完整流程：
//!
//! 1. 校验请求
//! 2. 策略门：黑名单 → 限流 → 幂等占位
//! 3. 渲染模板
//! 4. 查找发送器，首次使用时按配置源完成初始化
//! 5. 拦截器 before_send → 带重试的发送 → after_send / on_error
//! 6. 成功时写入幂等记录，失败时释放幂等占位与限流名额
//!
//! 任一阶段失败即终止，错误带上失败阶段。调用方通过再次分发来重试。
//! 发送器 panic 按失败处理，不会让占位一直留到过期。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use notify_shared::observability::metrics;
use notify_shared::retry::RetryPolicy;

use crate::config_source::{SenderConfigSource, StaticConfigSource};
use crate::error::{
    ConfigurationError, DenyReason, DispatchError, DispatchErrorKind, FailureKind, Result,
    TemplateError,
};
use crate::interceptor::InterceptorChain;
use crate::policy::{
    BlacklistChecker, IdempotencyStore, NoopBlacklist, NoopIdempotencyStore, NoopRateLimiter,
    RateLimiter,
};
use crate::registry::SenderRegistry;
use crate::retry::send_with_retry;
use crate::sender::Sender;
use crate::template::{PLACEHOLDER_TYPE, RendererRegistry};
use crate::types::{DispatchStage, OutboundMessage, SendRequest, SendResult};

/// 通知分发器
///
/// 内部组件均为 `Arc` 共享，克隆开销很小，可以在多个任务间传递。
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SenderRegistry>,
    renderers: Arc<RendererRegistry>,
    config_source: Arc<dyn SenderConfigSource>,
    idempotency: Arc<dyn IdempotencyStore>,
    blacklist: Arc<dyn BlacklistChecker>,
    rate_limiter: Arc<dyn RateLimiter>,
    interceptors: Arc<InterceptorChain>,
    retry_policy: RetryPolicy,
    default_template_type: Arc<str>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn registry(&self) -> &Arc<SenderRegistry> {
        &self.registry
    }

    /// 运行期注册发送器
    pub fn register(&self, channel_type: &str, sender: Arc<dyn Sender>) {
        self.registry.register(channel_type, sender);
    }

    /// 分发一条通知
    #[instrument(
        skip(self, request),
        fields(
            request_id = %request.request_id,
            channel = %request.channel_type,
            target = %request.target
        )
    )]
    pub async fn dispatch(&self, request: SendRequest) -> Result<SendResult> {
        let start = Instant::now();
        let request = Arc::new(request);
        let scope = request.scope_key();

        debug!(stage = %DispatchStage::Received, "收到发送请求");
        let slot = match self.admit(&request, &scope).await {
            Ok(slot) => slot,
            Err(err) => {
                self.interceptors.on_error(&request, &err).await;
                return Err(err);
            }
        };
        debug!(stage = %DispatchStage::GateChecked, "策略检查通过");

        let outcome = AssertUnwindSafe(self.deliver(&request, start))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(self.panicked(&request, panic.as_ref())));

        match outcome {
            Ok(result) => {
                self.interceptors.after_send(&request, &result).await;
                self.record_success(&scope).await;
                debug!(
                    stage = %DispatchStage::Completed,
                    duration_ms = result.duration_ms,
                    "分发完成"
                );
                Ok(result)
            }
            Err(err) => {
                self.interceptors.on_error(&request, &err).await;
                self.resolve_failure(&request, &scope, slot, &err).await;
                Err(err)
            }
        }
    }

    /// 分发并把失败折叠进 `SendResult`
    ///
    /// 供只需要结果对象的调用方使用，例如消息队列的消费回调。
    pub async fn dispatch_outcome(&self, request: SendRequest) -> SendResult {
        let start = Instant::now();
        match self.dispatch(request).await {
            Ok(result) => result,
            Err(err) => err.to_send_result(start.elapsed().as_millis() as u64),
        }
    }

    /// 批量分发，各请求相互独立并发执行，结果顺序与输入一致
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn dispatch_batch(&self, requests: Vec<SendRequest>) -> Vec<Result<SendResult>> {
        info!("开始批量分发通知");
        join_all(requests.into_iter().map(|request| self.dispatch(request))).await
    }

    /// 在后台任务中分发，失败只记录日志
    pub fn dispatch_detached(&self, request: SendRequest) -> JoinHandle<Result<SendResult>> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.dispatch(request).await;
            if let Err(e) = &outcome {
                error!(error = %e, "后台分发通知失败");
            }
            outcome
        })
    }

    /// 只渲染不发送，用于预览
    pub fn preview(
        &self,
        template_type: Option<&str>,
        content: &str,
        variables: &HashMap<String, Value>,
    ) -> std::result::Result<String, TemplateError> {
        let template_type = template_type.unwrap_or(&*self.default_template_type);
        self.renderers.get(template_type).render(content, variables)
    }

    /// 释放全部发送器
    pub async fn shutdown(&self) {
        self.registry.destroy_all().await;
    }

    /// 校验与策略门，成功时持有幂等占位，返回值表示是否占用了限流名额
    async fn admit(&self, request: &SendRequest, scope: &str) -> Result<bool> {
        request.validate().map_err(|reason| {
            DispatchError::new(
                request,
                DispatchStage::Received,
                DispatchErrorKind::Validation(reason),
            )
        })?;

        match self.blacklist.is_blacklisted(request).await {
            Ok(true) => return Err(self.deny(request, DenyReason::Blacklisted)),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "黑名单检查失败，按未命中放行"),
        }

        let slot = match self.rate_limiter.acquire(request).await {
            Ok(true) => true,
            Ok(false) => return Err(self.deny(request, DenyReason::RateLimited)),
            Err(e) => {
                warn!(error = %e, "限流检查失败，放行请求");
                false
            }
        };

        let claimed = match self.idempotency.try_begin(scope).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.deny(request, DenyReason::Duplicate)),
            Err(e) => {
                error!(error = %e, "幂等存储不可用，拒绝发送");
                Err(DispatchError::new(
                    request,
                    DispatchStage::GateChecked,
                    DispatchErrorKind::PolicyStore(e.to_string()),
                ))
            }
        };
        if let Err(err) = claimed {
            if slot {
                self.release_slot(request).await;
            }
            return Err(err);
        }
        Ok(slot)
    }

    fn deny(&self, request: &SendRequest, reason: DenyReason) -> DispatchError {
        metrics::record_policy_denied(reason.as_str());
        warn!(reason = %reason, "策略拒绝发送");
        DispatchError::new(
            request,
            DispatchStage::GateChecked,
            DispatchErrorKind::PolicyDenied(reason),
        )
    }

    /// 渲染、初始化发送器并发送
    async fn deliver(&self, request: &Arc<SendRequest>, start: Instant) -> Result<SendResult> {
        let content = self.render(request)?;
        debug!(stage = %DispatchStage::Rendered, "模板渲染完成");

        let sender = self.resolve_sender(request).await?;
        debug!(stage = %DispatchStage::Configured, "发送器就绪");

        let message = OutboundMessage::new(Arc::clone(request), content);
        self.interceptors.before_send(request).await;

        let channel = request.channel_type.as_str();
        match send_with_retry(sender.as_ref(), &message, &self.retry_policy).await {
            Ok(sent) => {
                metrics::record_send_attempts(channel, sent.attempts);
                debug!(stage = %DispatchStage::Sent, attempts = sent.attempts, "发送成功");
                Ok(SendResult::success(
                    request,
                    sent.value,
                    sent.attempts,
                    start.elapsed().as_millis() as u64,
                ))
            }
            Err(failed) => {
                metrics::record_send_attempts(channel, failed.attempts);
                let kind = match failed.value.kind {
                    FailureKind::NotConfigured => {
                        DispatchErrorKind::NotConfigured(request.channel_type.clone())
                    }
                    FailureKind::Retryable => DispatchErrorKind::FatalSend {
                        reason: failed.value.reason,
                        attempts: failed.attempts,
                        exhausted: true,
                    },
                    FailureKind::Fatal => DispatchErrorKind::FatalSend {
                        reason: failed.value.reason,
                        attempts: failed.attempts,
                        exhausted: false,
                    },
                };
                error!(attempts = failed.attempts, error = %kind, "通知发送失败");
                Err(DispatchError::new(request, DispatchStage::Sent, kind))
            }
        }
    }

    /// 模板类型优先级：请求 → 发送器当前配置 → 分发器默认
    fn render(&self, request: &SendRequest) -> Result<String> {
        let configured_type = self
            .registry
            .get(Some(request.channel_type.as_str()))
            .ok()
            .and_then(|sender| sender.gate().latest())
            .and_then(|config| config.template_type.clone());
        let template_type = request
            .template_type
            .clone()
            .or(configured_type)
            .unwrap_or_else(|| self.default_template_type.to_string());

        self.renderers
            .get(&template_type)
            .render(&request.template_content, &request.variables)
            .map_err(|e| DispatchError::new(request, DispatchStage::Rendered, e.into()))
    }

    /// 查找发送器，未初始化时从配置源加载配置并初始化
    async fn resolve_sender(&self, request: &SendRequest) -> Result<Arc<dyn Sender>> {
        let fail = |kind: DispatchErrorKind| {
            DispatchError::new(request, DispatchStage::Configured, kind)
        };
        let channel = request.channel_type.as_str();

        let sender = self.registry.get(Some(channel)).map_err(fail)?;
        if sender.is_configured() {
            return Ok(sender);
        }

        let config = match self.config_source.load(channel).await {
            Ok(Some(config)) => config,
            Ok(None) => sender.default_configuration().ok_or_else(|| {
                fail(ConfigurationError::new(channel, "缺少渠道配置").into())
            })?,
            Err(e) => return Err(fail(ConfigurationError::new(channel, e.to_string()).into())),
        };

        sender.configure(config).map_err(|e| {
            error!(error = %e, "发送器初始化失败");
            fail(e.into())
        })?;
        Ok(sender)
    }

    async fn record_success(&self, scope: &str) {
        if let Err(e) = self.idempotency.put(scope).await {
            error!(error = %e, "写入幂等记录失败，重复请求可能再次发送");
        }
        debug!(stage = %DispatchStage::Recorded, "发送记录已写入");
    }

    /// 永久失败视为终态，其余失败释放占位以便调用方重试
    async fn resolve_failure(
        &self,
        request: &SendRequest,
        scope: &str,
        slot: bool,
        err: &DispatchError,
    ) {
        let outcome = if err.kind.is_permanent_send_failure() {
            self.idempotency.put(scope).await
        } else {
            self.idempotency.abandon(scope).await
        };
        if let Err(e) = outcome {
            warn!(error = %e, "更新幂等状态失败");
        }
        if slot {
            self.release_slot(request).await;
        }
    }

    async fn release_slot(&self, request: &SendRequest) {
        if let Err(e) = self.rate_limiter.release(request).await {
            warn!(error = %e, "归还限流名额失败");
        }
    }

    fn panicked(&self, request: &SendRequest, payload: &(dyn Any + Send)) -> DispatchError {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(reason = %reason, "发送过程 panic");
        DispatchError::new(
            request,
            DispatchStage::Sent,
            DispatchErrorKind::SenderPanicked(reason),
        )
    }
}

/// 分发器构建器，未设置的组件使用空实现
pub struct DispatcherBuilder {
    registry: Option<Arc<SenderRegistry>>,
    renderers: RendererRegistry,
    config_source: Arc<dyn SenderConfigSource>,
    idempotency: Arc<dyn IdempotencyStore>,
    blacklist: Arc<dyn BlacklistChecker>,
    rate_limiter: Arc<dyn RateLimiter>,
    interceptors: InterceptorChain,
    retry_policy: RetryPolicy,
    default_template_type: String,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            renderers: RendererRegistry::with_defaults(),
            config_source: Arc::new(StaticConfigSource::new()),
            idempotency: Arc::new(NoopIdempotencyStore),
            blacklist: Arc::new(NoopBlacklist),
            rate_limiter: Arc::new(NoopRateLimiter),
            interceptors: InterceptorChain::new(),
            retry_policy: RetryPolicy::default(),
            default_template_type: PLACEHOLDER_TYPE.to_string(),
        }
    }
}

impl DispatcherBuilder {
    pub fn registry(mut self, registry: Arc<SenderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn renderers(mut self, renderers: RendererRegistry) -> Self {
        self.renderers = renderers;
        self
    }

    pub fn config_source(mut self, source: Arc<dyn SenderConfigSource>) -> Self {
        self.config_source = source;
        self
    }

    pub fn idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = store;
        self
    }

    pub fn blacklist(mut self, checker: Arc<dyn BlacklistChecker>) -> Self {
        self.blacklist = checker;
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn interceptors(mut self, chain: InterceptorChain) -> Self {
        self.interceptors = chain;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn default_template_type(mut self, template_type: impl Into<String>) -> Self {
        self.default_template_type = template_type.into();
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(SenderRegistry::new())),
            renderers: Arc::new(self.renderers),
            config_source: self.config_source,
            idempotency: self.idempotency,
            blacklist: self.blacklist,
            rate_limiter: self.rate_limiter,
            interceptors: Arc::new(self.interceptors),
            retry_policy: self.retry_policy,
            default_template_type: Arc::from(self.default_template_type),
        }
    }
}
