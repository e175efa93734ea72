//! 共享库集成测试
//!
//! 通过公开 API 验证配置、重试与指标模块的协作。

mod metrics_tests {
    use notify_shared::observability::metrics::{
        record_dispatch, record_dispatch_failure, record_policy_denied, record_send_attempts,
    };

    #[test]
    fn test_record_dispatch_outcomes() {
        // 未安装 recorder 时记录为空操作
        record_dispatch("email", "success", 0.05);
        record_dispatch("sms-aliyun", "success", 0.2);
        record_dispatch_failure("email", "FATAL_SEND");
        record_dispatch_failure("console", "TEMPLATE");
    }

    #[test]
    fn test_record_attempts_and_denials() {
        record_send_attempts("email", 1);
        record_send_attempts("sms", 3);
        record_policy_denied("blacklisted");
        record_policy_denied("rate_limited");
        record_policy_denied("duplicate");
    }
}

mod retry_tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use notify_shared::config::RetryConfig;
    use notify_shared::error::SharedError;
    use notify_shared::retry::{RetryPolicy, retry_with_policy};
    use tokio_test::{assert_err, assert_ok};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::from(&RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        })
    }

    #[test]
    fn test_internal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), SharedError> = tokio_test::block_on(retry_with_policy(
            &fast_policy(5),
            "internal",
            SharedError::is_retryable,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SharedError::Internal("bad state".to_string())) }
            },
        ));

        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_errors_recover_within_budget() {
        let calls = AtomicU32::new(0);

        let result = tokio_test::block_on(retry_with_policy(
            &fast_policy(3),
            "flaky",
            |_: &String| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("第 {n} 次失败"))
                    } else {
                        Ok(n)
                    }
                }
            },
        ));

        assert_eq!(assert_ok!(result), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_policy_from_config_clamps_attempts() {
        let policy = fast_policy(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(1));
        assert!(policy.delay_for_attempt(10) <= Duration::from_millis(2));
    }
}

mod config_tests {
    use notify_shared::config::{AppConfig, GateBackend};

    #[test]
    fn test_default_config_needs_no_redis() {
        let config = AppConfig::default();
        assert!(!config.requires_redis());
        assert_eq!(config.dispatch.idempotency.backend, GateBackend::Memory);
        assert_eq!(config.dispatch.default_template_type, "placeholder");
        assert!(!config.is_production());
    }
}
