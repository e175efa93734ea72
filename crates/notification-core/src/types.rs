//! 分发核心的数据结构
//!
//! 定义发送请求、渠道配置、发送结果以及分发管道的阶段。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use notify_shared::config::ChannelConfig;

/// 发送请求
///
/// 由调用方构造，进入分发管道后包装为 `Arc` 只读共享，下游组件不会修改它。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// 调用方提供的幂等键，跨重试标识同一次逻辑发送
    pub request_id: String,
    /// 渠道键，用于查找发送器（大小写不敏感）
    pub channel_type: String,
    /// 目标地址（邮箱、手机号等）
    pub target: String,
    /// 原始模板文本
    #[serde(default)]
    pub template_content: String,
    /// 渲染器类型，缺省时使用分发器的默认类型
    #[serde(default)]
    pub template_type: Option<String>,
    /// 模板变量
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// 抄送目标，保持调用方给出的顺序
    #[serde(default)]
    pub cc: Vec<String>,
    /// 租户标识，参与幂等键与限流键的计算
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl SendRequest {
    pub fn new(
        request_id: impl Into<String>,
        channel_type: impl Into<String>,
        target: impl Into<String>,
        template_content: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            channel_type: channel_type.into(),
            target: target.into(),
            template_content: template_content.into(),
            template_type: None,
            variables: HashMap::new(),
            cc: Vec::new(),
            tenant_id: None,
        }
    }

    /// 添加模板变量
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// 批量添加模板变量
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    pub fn with_template_type(mut self, template_type: impl Into<String>) -> Self {
        self.template_type = Some(template_type.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// 幂等存储使用的键，多租户时带租户前缀
    pub fn scope_key(&self) -> String {
        match &self.tenant_id {
            Some(tenant) => format!("{}:{}", tenant, self.request_id),
            None => self.request_id.clone(),
        }
    }

    /// 校验请求必填字段
    pub fn validate(&self) -> Result<(), String> {
        if self.request_id.trim().is_empty() {
            return Err("requestId 不能为空".to_string());
        }
        if self.target.trim().is_empty() {
            return Err("target 不能为空".to_string());
        }
        if self.channel_type.trim().is_empty() {
            return Err("channelType 不能为空".to_string());
        }
        Ok(())
    }
}

/// 发送器配置
///
/// `config` 中的键值只有目标发送器能解释。存入配置闸门后不再修改，只会被整体替换。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderConfiguration {
    pub template_type: Option<String>,
    pub channel_type: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl SenderConfiguration {
    pub fn new(channel_type: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            ..Self::default()
        }
    }

    pub fn with_template_type(mut self, template_type: impl Into<String>) -> Self {
        self.template_type = Some(template_type.into());
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// 读取必填配置项，缺失或为空时报错
    pub fn require(&self, key: &str) -> anyhow::Result<&str> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(anyhow!("缺少配置项 {key}")),
        }
    }
}

impl From<&ChannelConfig> for SenderConfiguration {
    fn from(channel: &ChannelConfig) -> Self {
        Self {
            template_type: channel.template_type.clone(),
            channel_type: channel.channel_type.clone(),
            config: channel.config.clone(),
        }
    }
}

/// 渲染完成、交给发送器的消息
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    request: Arc<SendRequest>,
    content: String,
}

impl OutboundMessage {
    pub fn new(request: Arc<SendRequest>, content: String) -> Self {
        Self { request, content }
    }

    pub fn request(&self) -> &SendRequest {
        &self.request
    }

    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    pub fn target(&self) -> &str {
        &self.request.target
    }

    pub fn cc(&self) -> &[String] {
        &self.request.cc
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.request.variables
    }

    /// 渲染后的正文
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// 发送器单次调用成功的回执
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// 服务商返回的流水号
    pub transaction_id: Option<String>,
}

impl Delivery {
    pub fn with_transaction_id(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: Some(transaction_id.into()),
        }
    }
}

/// 一次分发的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub request_id: String,
    pub channel_type: String,
    pub success: bool,
    /// 服务商流水号（成功时）
    pub transaction_id: Option<String>,
    /// 失败原因（失败时）
    pub failure_reason: Option<String>,
    /// 发送器物理调用次数
    pub attempts: u32,
    pub duration_ms: u64,
    pub sent_at: DateTime<Utc>,
}

impl SendResult {
    /// 创建成功结果
    pub fn success(
        request: &SendRequest,
        delivery: Delivery,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            request_id: request.request_id.clone(),
            channel_type: request.channel_type.clone(),
            success: true,
            transaction_id: delivery.transaction_id,
            failure_reason: None,
            attempts,
            duration_ms,
            sent_at: Utc::now(),
        }
    }

    /// 创建失败结果
    pub fn failed(
        request_id: impl Into<String>,
        channel_type: impl Into<String>,
        reason: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            channel_type: channel_type.into(),
            success: false,
            transaction_id: None,
            failure_reason: Some(reason.into()),
            attempts,
            duration_ms,
            sent_at: Utc::now(),
        }
    }
}

/// 分发管道的阶段
///
/// 按 Received → GateChecked → Rendered → Configured → Sent → Recorded → Completed 推进，
/// 任一阶段失败都直接终止。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStage {
    Received,
    GateChecked,
    Rendered,
    Configured,
    Sent,
    Recorded,
    Completed,
}

impl DispatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::GateChecked => "GATE_CHECKED",
            Self::Rendered => "RENDERED",
            Self::Configured => "CONFIGURED",
            Self::Sent => "SENT",
            Self::Recorded => "RECORDED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
