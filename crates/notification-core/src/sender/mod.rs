//! 渠道发送器
//!
//! 通过 `Sender` trait 抽象各渠道的发送行为。实现方只需提供一次性初始化
//! `do_configure` 与实际投递 `do_send`，配置存储、并发初始化保护和
//! 未配置检查由 trait 的默认方法统一完成。

mod console;
mod email;
mod sms;

pub use console::ConsoleSender;
pub use email::EmailSender;
pub use sms::{AliyunSmsProvider, SmsProvider, SmsSender, TencentSmsProvider, sms_provider};

use async_trait::async_trait;

use crate::error::{ConfigurationError, SendFailure};
use crate::gate::ConfigurationGate;
use crate::types::{Delivery, OutboundMessage, SenderConfiguration};

#[async_trait]
pub trait Sender: Send + Sync {
    /// 发送器实现名（email / sms / console）
    fn channel_type(&self) -> &str;

    fn gate(&self) -> &ConfigurationGate;

    /// 一次性初始化，整个生命周期内至多成功一次
    fn do_configure(&self, _config: &SenderConfiguration) -> anyhow::Result<()> {
        Ok(())
    }

    /// 投递一条已渲染的消息，`config` 为最新存储的配置
    async fn do_send(
        &self,
        message: &OutboundMessage,
        config: &SenderConfiguration,
    ) -> Result<Delivery, SendFailure>;

    /// 配置源没有该渠道的配置时使用
    fn default_configuration(&self) -> Option<SenderConfiguration> {
        None
    }

    /// 销毁前释放实现方持有的资源
    fn do_destroy(&self) {}

    fn configure(&self, config: SenderConfiguration) -> Result<(), ConfigurationError> {
        self.gate().configure(config, |cfg| self.do_configure(cfg))
    }

    fn is_configured(&self) -> bool {
        self.gate().is_configured()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Delivery, SendFailure> {
        let Some(config) = self.gate().configuration() else {
            return Err(SendFailure::not_configured(self.channel_type()));
        };
        self.do_send(message, &config).await
    }

    async fn destroy(&self) {
        self.do_destroy();
        self.gate().reset();
    }
}
