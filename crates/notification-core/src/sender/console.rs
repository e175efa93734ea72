//! 控制台发送器，把消息写入日志，用于本地开发和联调

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::Sender;
use crate::error::SendFailure;
use crate::gate::ConfigurationGate;
use crate::types::{Delivery, OutboundMessage, SenderConfiguration};

#[derive(Default)]
pub struct ConsoleSender {
    gate: ConfigurationGate,
}

impl ConsoleSender {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sender for ConsoleSender {
    fn channel_type(&self) -> &str {
        "console"
    }

    fn gate(&self) -> &ConfigurationGate {
        &self.gate
    }

    async fn do_send(
        &self,
        message: &OutboundMessage,
        _config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure> {
        let message_id = format!("console_{}", Uuid::now_v7());
        info!(
            channel = "console",
            request_id = %message.request_id(),
            message_id = %message_id,
            target = %message.target(),
            cc = ?message.cc(),
            content = %message.content(),
            "控制台输出通知"
        );
        Ok(Delivery::with_transaction_id(message_id))
    }

    fn default_configuration(&self) -> Option<SenderConfiguration> {
        Some(SenderConfiguration::new("console"))
    }
}
