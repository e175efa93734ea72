//! 分发核心错误类型
//!
//! 每个失败都带上所在阶段与请求上下文，调用方据此区分
//! 策略拒绝、模板缺参、渠道配置错误和发送失败，并决定是否稍后重试。

use std::fmt;

use thiserror::Error;

use crate::types::{DispatchStage, SendRequest, SendResult};

/// 策略拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Blacklisted,
    RateLimited,
    Duplicate,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blacklisted => "blacklisted",
            Self::RateLimited => "rate_limited",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模板缺少变量，`missing` 按名称排序
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("模板变量缺失: {}", .missing.join(", "))]
pub struct TemplateError {
    pub missing: Vec<String>,
}

/// 渠道初始化失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("渠道 {channel} 配置失败: {reason}")]
pub struct ConfigurationError {
    pub channel: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

/// 发送失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 瞬时故障（超时、限流、连接中断），可以重试
    Retryable,
    /// 永久故障（地址无效、内容被拒），重试无意义
    Fatal,
    /// 发送器尚未完成初始化
    NotConfigured,
}

/// 发送器单次调用的失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SendFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl SendFailure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            reason: reason.into(),
        }
    }

    pub fn not_configured(channel: &str) -> Self {
        Self {
            kind: FailureKind::NotConfigured,
            reason: format!("发送器 {channel} 尚未配置"),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }
}

/// 分发失败的类别
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchErrorKind {
    #[error("请求校验失败: {0}")]
    Validation(String),

    #[error("策略拒绝: {0}")]
    PolicyDenied(DenyReason),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("不支持的渠道: {0}")]
    UnsupportedChannel(String),

    #[error("渠道未完成配置: {0}")]
    NotConfigured(String),

    /// 永久失败或重试耗尽，`exhausted` 区分两者
    #[error("发送失败（共尝试 {attempts} 次）: {reason}")]
    FatalSend {
        reason: String,
        attempts: u32,
        exhausted: bool,
    },

    #[error("策略存储不可用: {0}")]
    PolicyStore(String),

    /// 发送器在初始化或发送过程中 panic
    #[error("发送器异常终止: {0}")]
    SenderPanicked(String),
}

impl DispatchErrorKind {
    /// 错误码，用于日志和指标标签
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::PolicyDenied(DenyReason::Blacklisted) => "BLACKLISTED",
            Self::PolicyDenied(DenyReason::RateLimited) => "RATE_LIMITED",
            Self::PolicyDenied(DenyReason::Duplicate) => "DUPLICATE",
            Self::Template(_) => "TEMPLATE",
            Self::Configuration(_) => "CONFIGURATION",
            Self::UnsupportedChannel(_) => "UNSUPPORTED_CHANNEL",
            Self::NotConfigured(_) => "NOT_CONFIGURED",
            Self::FatalSend { .. } => "FATAL_SEND",
            Self::PolicyStore(_) => "POLICY_STORE",
            Self::SenderPanicked(_) => "SENDER_PANIC",
        }
    }

    /// 失败前发送器被调用的次数
    pub fn attempts(&self) -> u32 {
        match self {
            Self::FatalSend { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// 调用方稍后以同一 request_id 重试是否可能成功
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Self::PolicyDenied(DenyReason::RateLimited))
    }

    /// 是否为策略拒绝
    pub fn is_policy_denied(&self) -> bool {
        matches!(self, Self::PolicyDenied(_))
    }

    /// 服务商明确拒绝的永久失败，重复提交也不会成功
    pub fn is_permanent_send_failure(&self) -> bool {
        matches!(
            self,
            Self::FatalSend {
                exhausted: false,
                ..
            }
        )
    }
}

/// 分发错误，携带失败阶段与请求上下文
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{stage}] {kind} (request_id={request_id}, channel={channel_type}, target={target})")]
pub struct DispatchError {
    pub request_id: String,
    pub channel_type: String,
    pub target: String,
    pub stage: DispatchStage,
    #[source]
    pub kind: DispatchErrorKind,
}

impl DispatchError {
    pub fn new(request: &SendRequest, stage: DispatchStage, kind: DispatchErrorKind) -> Self {
        Self {
            request_id: request.request_id.clone(),
            channel_type: request.channel_type.clone(),
            target: request.target.clone(),
            stage,
            kind,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_retryable_later(&self) -> bool {
        self.kind.is_retryable_later()
    }

    /// 转为失败的 `SendResult`，失败原因带错误码前缀
    pub fn to_send_result(&self, duration_ms: u64) -> SendResult {
        SendResult::failed(
            &self.request_id,
            &self.channel_type,
            format!("{}: {}", self.code(), self.kind),
            self.kind.attempts(),
            duration_ms,
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
