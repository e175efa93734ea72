//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 发送重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 单次逻辑发送的最大尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

/// 策略门的存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateBackend {
    /// 不启用该策略
    None,
    /// 进程内存储，单实例部署使用
    #[default]
    Memory,
    /// Redis 存储，多实例部署共享状态
    Redis,
}

/// 幂等配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub backend: GateBackend,
    /// 已完成记录的保留时间
    pub ttl_secs: u64,
    /// 处理中标记的保留时间，防止进程崩溃后永久占用
    pub in_flight_ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            backend: GateBackend::Memory,
            ttl_secs: 86_400,
            in_flight_ttl_secs: 300,
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn in_flight_ttl(&self) -> Duration {
        Duration::from_secs(self.in_flight_ttl_secs)
    }
}

/// 限流配置（固定窗口）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub backend: GateBackend,
    /// 时间窗口内允许的最大发送数
    pub max_requests: u64,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: GateBackend::Memory,
            max_requests: 60,
            window_secs: 60,
        }
    }
}

/// 分发管道配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub retry: RetryConfig,
    /// 请求未指定模板类型时使用的渲染器
    pub default_template_type: String,
    pub idempotency: IdempotencyConfig,
    pub rate_limit: RateLimitConfig,
    /// 黑名单目标，`@domain` 形式屏蔽整个邮箱域
    pub blacklist: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            default_template_type: "placeholder".to_string(),
            idempotency: IdempotencyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            blacklist: Vec::new(),
        }
    }
}

/// 渠道配置
///
/// 对应一个发送器插件的接入参数，`config` 的内容只有目标发送器能解释
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub channel_type: String,
    /// 发送器实现名（email/sms/console），缺省与 channel_type 相同
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub template_type: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub observability: ObservabilityConfig,
    pub redis: RedisConfig,
    pub dispatch: DispatchConfig,
    pub channels: Vec<ChannelConfig>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（NOTIFY__ 前缀）
    ///    如 NOTIFY__DISPATCH__RETRY__MAX_ATTEMPTS -> dispatch.retry.max_attempts
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("NOTIFY_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 字段名本身含下划线，层级分隔使用双下划线
            .add_source(
                Environment::with_prefix("NOTIFY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("dispatch.blacklist")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否有策略门需要 Redis
    pub fn requires_redis(&self) -> bool {
        self.dispatch.idempotency.backend == GateBackend::Redis
            || self.dispatch.rate_limit.backend == GateBackend::Redis
    }
}
