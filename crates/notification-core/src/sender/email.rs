//! 邮件发送器
//!
//! 当前为模拟投递（仅记录日志），初始化阶段校验 SMTP 接入参数，
//! 发送阶段校验收件人与抄送地址。

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use super::Sender;
use crate::error::SendFailure;
use crate::gate::ConfigurationGate;
use crate::template::value_to_string;
use crate::types::{Delivery, OutboundMessage, SenderConfiguration};

const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_SUBJECT: &str = "系统通知";

/// SMTP 连接参数，初始化时确定
#[derive(Debug, Clone, PartialEq, Eq)]
struct SmtpEndpoint {
    host: String,
    port: u16,
}

#[derive(Default)]
pub struct EmailSender {
    gate: ConfigurationGate,
    endpoint: RwLock<Option<SmtpEndpoint>>,
}

impl EmailSender {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 粗略的地址校验：恰好一个 @，域名部分带点
pub(crate) fn is_valid_address(address: &str) -> bool {
    let mut parts = address.trim().split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}

#[async_trait]
impl Sender for EmailSender {
    fn channel_type(&self) -> &str {
        "email"
    }

    fn gate(&self) -> &ConfigurationGate {
        &self.gate
    }

    fn do_configure(&self, config: &SenderConfiguration) -> anyhow::Result<()> {
        let from = config.require("from_address")?;
        if !is_valid_address(from) {
            anyhow::bail!("发件地址无效: {from}");
        }

        let host = config.require("smtp_host")?.to_string();
        let port = match config.get("smtp_port") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| anyhow::anyhow!("smtp_port 无效 ({raw}): {e}"))?,
            None => DEFAULT_SMTP_PORT,
        };

        *self.endpoint.write() = Some(SmtpEndpoint { host, port });
        Ok(())
    }

    async fn do_send(
        &self,
        message: &OutboundMessage,
        config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure> {
        let endpoint = self
            .endpoint
            .read()
            .clone()
            .ok_or_else(|| SendFailure::not_configured(self.channel_type()))?;

        if !is_valid_address(message.target()) {
            return Err(SendFailure::fatal(format!(
                "收件地址无效: {}",
                message.target()
            )));
        }
        if let Some(bad) = message.cc().iter().find(|cc| !is_valid_address(cc)) {
            return Err(SendFailure::fatal(format!("抄送地址无效: {bad}")));
        }

        let subject = message
            .variables()
            .get("subject")
            .map(value_to_string)
            .or_else(|| config.get("subject").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let from_name = config.get("from_name").unwrap_or("Notify");
        let message_id = format!("email_{}", Uuid::now_v7());

        info!(
            channel = "email",
            request_id = %message.request_id(),
            message_id = %message_id,
            smtp = %format!("{}:{}", endpoint.host, endpoint.port),
            from = %config.get("from_address").unwrap_or_default(),
            from_name = %from_name,
            to = %message.target(),
            cc = ?message.cc(),
            subject = %subject,
            "模拟发送邮件"
        );

        Ok(Delivery::with_transaction_id(message_id))
    }

    fn do_destroy(&self) {
        self.endpoint.write().take();
    }
}
