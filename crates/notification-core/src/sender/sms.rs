//! 短信发送器
//!
//! 短信服务商通过 `SmsProvider` 抽象，初始化时按配置项 `provider` 选定。
//! 各服务商目前为模拟实现：校验接入参数、号码与正文长度后记录日志。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use super::Sender;
use crate::error::SendFailure;
use crate::gate::ConfigurationGate;
use crate::types::{Delivery, OutboundMessage, SenderConfiguration};

/// 单条短信正文上限（字符数）
const MAX_CONTENT_CHARS: usize = 500;

#[async_trait]
pub trait SmsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// 校验接入参数
    fn validate(&self, config: &SenderConfiguration) -> anyhow::Result<()>;

    async fn send_sms(
        &self,
        phone: &str,
        content: &str,
        config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure>;
}

/// 按名称查找服务商
pub fn sms_provider(name: &str) -> Option<Arc<dyn SmsProvider>> {
    match name.trim().to_lowercase().as_str() {
        "tencent" => Some(Arc::new(TencentSmsProvider)),
        "aliyun" => Some(Arc::new(AliyunSmsProvider)),
        _ => None,
    }
}

fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (5..=20).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

fn check_message(phone: &str, content: &str) -> Result<(), SendFailure> {
    if !is_valid_phone(phone) {
        return Err(SendFailure::fatal(format!("手机号无效: {phone}")));
    }
    let chars = content.chars().count();
    if chars == 0 {
        return Err(SendFailure::fatal("短信正文为空"));
    }
    if chars > MAX_CONTENT_CHARS {
        return Err(SendFailure::fatal(format!(
            "短信正文过长: {chars} > {MAX_CONTENT_CHARS}"
        )));
    }
    Ok(())
}

/// 腾讯云短信
pub struct TencentSmsProvider;

#[async_trait]
impl SmsProvider for TencentSmsProvider {
    fn name(&self) -> &'static str {
        "tencent"
    }

    fn validate(&self, config: &SenderConfiguration) -> anyhow::Result<()> {
        config.require("secret_id")?;
        config.require("secret_key")?;
        config.require("sdk_app_id")?;
        config.require("sign_name")?;
        Ok(())
    }

    async fn send_sms(
        &self,
        phone: &str,
        content: &str,
        config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure> {
        check_message(phone, content)?;
        let serial_no = format!("tencent_{}", Uuid::now_v7());

        info!(
            provider = "tencent",
            sdk_app_id = %config.get("sdk_app_id").unwrap_or_default(),
            sign_name = %config.get("sign_name").unwrap_or_default(),
            phone = %phone,
            serial_no = %serial_no,
            "模拟发送腾讯云短信"
        );
        Ok(Delivery::with_transaction_id(serial_no))
    }
}

/// 阿里云短信
pub struct AliyunSmsProvider;

#[async_trait]
impl SmsProvider for AliyunSmsProvider {
    fn name(&self) -> &'static str {
        "aliyun"
    }

    fn validate(&self, config: &SenderConfiguration) -> anyhow::Result<()> {
        config.require("access_key_id")?;
        config.require("access_key_secret")?;
        config.require("sign_name")?;
        Ok(())
    }

    async fn send_sms(
        &self,
        phone: &str,
        content: &str,
        config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure> {
        check_message(phone, content)?;
        let biz_id = format!("aliyun_{}", Uuid::now_v7());

        info!(
            provider = "aliyun",
            region = %config.get("region").unwrap_or("cn-hangzhou"),
            sign_name = %config.get("sign_name").unwrap_or_default(),
            phone = %phone,
            biz_id = %biz_id,
            "模拟发送阿里云短信"
        );
        Ok(Delivery::with_transaction_id(biz_id))
    }
}

#[derive(Default)]
pub struct SmsSender {
    gate: ConfigurationGate,
    provider: RwLock<Option<Arc<dyn SmsProvider>>>,
}

impl SmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前使用的服务商名称
    pub fn provider_name(&self) -> Option<&'static str> {
        self.provider.read().as_ref().map(|p| p.name())
    }
}

#[async_trait]
impl Sender for SmsSender {
    fn channel_type(&self) -> &str {
        "sms"
    }

    fn gate(&self) -> &ConfigurationGate {
        &self.gate
    }

    fn do_configure(&self, config: &SenderConfiguration) -> anyhow::Result<()> {
        let name = config.require("provider")?;
        let provider =
            sms_provider(name).ok_or_else(|| anyhow::anyhow!("不支持的短信服务商: {name}"))?;
        provider.validate(config)?;

        *self.provider.write() = Some(provider);
        Ok(())
    }

    async fn do_send(
        &self,
        message: &OutboundMessage,
        config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure> {
        let provider = self
            .provider
            .read()
            .clone()
            .ok_or_else(|| SendFailure::not_configured(self.channel_type()))?;

        provider
            .send_sms(message.target(), message.content(), config)
            .await
    }

    fn do_destroy(&self) {
        self.provider.write().take();
    }
}
