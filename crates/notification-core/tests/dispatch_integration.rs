//! 分发流程集成测试
//!
//! 使用桩发送器与进程内策略门验证完整的分发流程，无需外部依赖。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};

use notification_core::Dispatcher;
use notification_core::config_source::StaticConfigSource;
use notification_core::error::{DenyReason, DispatchError, DispatchErrorKind, SendFailure};
use notification_core::gate::ConfigurationGate;
use notification_core::interceptor::{InterceptorChain, SendInterceptor};
use notification_core::policy::{
    IdempotencyStore, InMemoryBlacklist, InMemoryIdempotencyStore, InMemoryRateLimiter,
};
use notification_core::sender::Sender;
use notification_core::types::{
    Delivery, OutboundMessage, SendRequest, SendResult, SenderConfiguration,
};
use notify_shared::retry::RetryPolicy;

// ==================== 测试桩 ====================

/// 记录每次发送正文的桩发送器
#[derive(Default)]
struct RecordingSender {
    gate: ConfigurationGate,
    setups: AtomicUsize,
    sent: Mutex<Vec<String>>,
    failure: Option<SendFailure>,
    /// 前 N 次调用返回可重试失败
    transient_failures: AtomicUsize,
    panic_on_send: bool,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingSender {
    fn failing(failure: SendFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    fn flaky(failures: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    fn panicking() -> Self {
        Self {
            panic_on_send: true,
            ..Self::default()
        }
    }

    fn with_log(mut self, log: &Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    fn send_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    fn channel_type(&self) -> &str {
        "email"
    }

    fn gate(&self) -> &ConfigurationGate {
        &self.gate
    }

    fn do_configure(&self, _config: &SenderConfiguration) -> anyhow::Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        // 放大并发初始化的竞争窗口
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    async fn do_send(
        &self,
        message: &OutboundMessage,
        _config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure> {
        if self.panic_on_send {
            panic!("provider sdk crashed");
        }
        self.sent.lock().push(message.content().to_string());
        if let Some(log) = &self.log {
            log.lock().push("send".to_string());
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SendFailure::retryable("provider busy"));
        }
        Ok(Delivery::with_transaction_id(format!("tx-{}", message.request_id())))
    }
}

struct OrderingInterceptor {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SendInterceptor for OrderingInterceptor {
    fn name(&self) -> &str {
        self.name
    }

    async fn before_send(&self, _request: &SendRequest) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}.before", self.name));
        Ok(())
    }

    async fn after_send(&self, _request: &SendRequest, _result: &SendResult) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}.after", self.name));
        Ok(())
    }

    async fn on_error(&self, _request: &SendRequest, _error: &DispatchError) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}.on_error", self.name));
        Ok(())
    }
}

fn ordering_chain(log: &Arc<Mutex<Vec<String>>>, names: &[&'static str]) -> InterceptorChain {
    names.iter().fold(InterceptorChain::new(), |chain, &name| {
        chain.with(Arc::new(OrderingInterceptor {
            name,
            log: Arc::clone(log),
        }))
    })
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        multiplier: 2.0,
    }
}

fn email_config_source() -> Arc<StaticConfigSource> {
    let config = SenderConfiguration::new("email").with_entry("from_address", "noreply@x.com");
    let source = StaticConfigSource::new();
    source.insert(config);
    Arc::new(source)
}

fn hello(request_id: &str) -> SendRequest {
    SendRequest::new(request_id, "email", "user@x.com", "hi ${name}").with_variable("name", "Ann")
}

// ==================== 测试用例 ====================

#[tokio::test]
async fn test_end_to_end_then_duplicate() {
    let sender = Arc::new(RecordingSender::default());
    let store = Arc::new(InMemoryIdempotencyStore::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .idempotency(store.clone())
        .retry_policy(fast_retry(3))
        .build();
    dispatcher.register("email", sender.clone());

    let result = assert_ok!(dispatcher.dispatch(hello("r1")).await);
    assert!(result.success);
    assert_eq!(result.transaction_id.as_deref(), Some("tx-r1"));
    assert_eq!(*sender.sent.lock(), vec!["hi Ann"]);
    assert!(store.exists("r1").await.unwrap());

    let err = assert_err!(dispatcher.dispatch(hello("r1")).await);
    assert_eq!(err.kind, DispatchErrorKind::PolicyDenied(DenyReason::Duplicate));
    assert_eq!(sender.send_count(), 1);
}

#[tokio::test]
async fn test_tenants_do_not_share_idempotency_keys() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .idempotency(Arc::new(InMemoryIdempotencyStore::default()))
        .build();
    dispatcher.register("email", sender.clone());

    assert_ok!(dispatcher.dispatch(hello("r1").with_tenant("t1")).await);
    assert_ok!(dispatcher.dispatch(hello("r1").with_tenant("t2")).await);
    assert_err!(dispatcher.dispatch(hello("r1").with_tenant("t1")).await);
    assert_eq!(sender.send_count(), 2);
}

#[tokio::test]
async fn test_missing_variables_are_reported() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .build();
    dispatcher.register("email", sender.clone());

    let request = SendRequest::new("r1", "email", "user@x.com", "${a} ${b}").with_variable("a", 1);
    let err = assert_err!(dispatcher.dispatch(request).await);

    match err.kind {
        DispatchErrorKind::Template(e) => assert_eq!(e.missing, vec!["b"]),
        other => panic!("Expected Template, got {other:?}"),
    }
    assert_eq!(sender.send_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_first_use_configures_once() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .retry_policy(fast_retry(1))
        .build();
    dispatcher.register("email", sender.clone());

    let handles: Vec<_> = (0..32)
        .map(|i| dispatcher.dispatch_detached(hello(&format!("r{i}"))))
        .collect();
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(sender.setups.load(Ordering::SeqCst), 1);
    assert_eq!(sender.send_count(), 32);
}

#[tokio::test]
async fn test_blacklisted_target_never_reaches_sender() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .blacklist(Arc::new(InMemoryBlacklist::from_entries(["user@x.com"])))
        .build();
    dispatcher.register("email", sender.clone());

    let err = assert_err!(dispatcher.dispatch(hello("r1")).await);
    assert_eq!(err.kind, DispatchErrorKind::PolicyDenied(DenyReason::Blacklisted));
    assert_eq!(sender.send_count(), 0);
    assert!(!sender.is_configured());
}

#[tokio::test]
async fn test_rate_limit_counts_successful_sends() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .rate_limiter(Arc::new(InMemoryRateLimiter::new(2, Duration::from_secs(60))))
        .build();
    dispatcher.register("email", sender.clone());

    assert_ok!(dispatcher.dispatch(hello("r1")).await);
    assert_ok!(dispatcher.dispatch(hello("r2")).await);
    let err = assert_err!(dispatcher.dispatch(hello("r3")).await);

    assert!(err.is_retryable_later());
    assert_eq!(sender.send_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rate_limit_holds_under_concurrent_batch() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .rate_limiter(Arc::new(InMemoryRateLimiter::new(1, Duration::from_secs(60))))
        .build();
    dispatcher.register("email", sender.clone());

    let requests = (0..5).map(|i| hello(&format!("r{i}"))).collect();
    let results = dispatcher.dispatch_batch(requests).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(err.is_retryable_later());
    }
    assert_eq!(sender.send_count(), 1);
}

#[tokio::test]
async fn test_failed_send_does_not_consume_quota() {
    let failing = Arc::new(RecordingSender::failing(SendFailure::fatal("bounced")));
    let limiter = Arc::new(InMemoryRateLimiter::new(1, Duration::from_secs(60)));
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .rate_limiter(limiter)
        .build();
    dispatcher.register("email", failing);

    let err = assert_err!(dispatcher.dispatch(hello("r1")).await);
    assert_eq!(err.code(), "FATAL_SEND");

    dispatcher.register("email", Arc::new(RecordingSender::default()));
    assert_ok!(dispatcher.dispatch(hello("r2")).await);
}

#[tokio::test]
async fn test_retryable_failures_are_bounded() {
    let sender = Arc::new(RecordingSender::failing(SendFailure::retryable("provider timeout")));
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .retry_policy(fast_retry(4))
        .build();
    dispatcher.register("email", sender.clone());

    let err = assert_err!(dispatcher.dispatch(hello("r1")).await);
    match err.kind {
        DispatchErrorKind::FatalSend {
            attempts,
            exhausted,
            ..
        } => {
            assert_eq!(attempts, 4);
            assert!(exhausted);
        }
        other => panic!("Expected FatalSend, got {other:?}"),
    }
    assert_eq!(sender.send_count(), 4);
}

#[tokio::test]
async fn test_sender_panic_is_reported_and_releases_claim() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::new(InMemoryIdempotencyStore::default());
    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .idempotency(store.clone())
        .interceptors(ordering_chain(&log, &["A"]))
        .build();
    dispatcher.register("email", Arc::new(RecordingSender::panicking()));

    let outcome = dispatcher.dispatch_detached(hello("r1")).await;
    let err = assert_err!(assert_ok!(outcome));
    assert_eq!(err.code(), "SENDER_PANIC");
    assert_eq!(*log.lock(), vec!["A.before", "A.on_error"]);
    assert!(!store.exists("r1").await.unwrap());

    // 换上正常的发送器后，同一 request_id 可以重新发送
    let healthy = Arc::new(RecordingSender::default());
    dispatcher.register("email", healthy.clone());
    assert_ok!(dispatcher.dispatch(hello("r1")).await);
    assert_eq!(healthy.send_count(), 1);
}

#[tokio::test]
async fn test_interceptor_order_on_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sender = Arc::new(RecordingSender::default().with_log(&log));

    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .interceptors(ordering_chain(&log, &["A", "B"]))
        .build();
    dispatcher.register("email", sender);

    assert_ok!(dispatcher.dispatch(hello("r1")).await);
    assert_eq!(
        *log.lock(),
        vec!["A.before", "B.before", "send", "A.after", "B.after"]
    );
}

#[tokio::test]
async fn test_interceptors_fire_once_across_retries() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sender = Arc::new(RecordingSender::flaky(2).with_log(&log));

    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .interceptors(ordering_chain(&log, &["A", "B"]))
        .retry_policy(fast_retry(3))
        .build();
    dispatcher.register("email", sender.clone());

    let result = assert_ok!(dispatcher.dispatch(hello("r1")).await);
    assert_eq!(result.attempts, 3);
    assert_eq!(sender.send_count(), 3);
    assert_eq!(
        log.lock().join(","),
        "A.before,B.before,send,send,send,A.after,B.after"
    );
}

#[tokio::test]
async fn test_interceptor_order_on_failure() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let failure = SendFailure::fatal("mailbox rejected");
    let sender = Arc::new(RecordingSender::failing(failure).with_log(&log));

    let dispatcher = Dispatcher::builder()
        .config_source(email_config_source())
        .interceptors(ordering_chain(&log, &["A", "B"]))
        .retry_policy(fast_retry(3))
        .build();
    dispatcher.register("email", sender);

    let err = assert_err!(dispatcher.dispatch(hello("r1")).await);
    assert!(matches!(
        err.kind,
        DispatchErrorKind::FatalSend {
            exhausted: false,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(
        *log.lock(),
        vec!["A.before", "B.before", "send", "A.on_error", "B.on_error"]
    );
}

#[test]
fn test_render_is_identity_without_placeholders() {
    let text = "plain text with $ and {braces}";
    let rendered = notification_core::render(text, &Default::default()).unwrap();
    assert_eq!(rendered, text);
}
