//! 发送器注册表
//!
//! 按渠道键（大小写不敏感）索引发送器实例，支持运行期动态注册。
//! 同一种实现可以用不同的键注册多次，例如 `sms-tencent` 与 `sms-aliyun`
//! 各自持有独立的配置闸门。
//!
//! ```ignore
//! let registry = SenderRegistry::with_defaults();
//! registry.register("sms-aliyun", instantiate("sms").unwrap());
//! let sender = registry.get(Some("EMAIL"))?;
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::DispatchErrorKind;
use crate::sender::{ConsoleSender, EmailSender, Sender, SmsSender};

/// 发送器工厂
pub type SenderFactory = fn() -> Arc<dyn Sender>;

fn email_sender() -> Arc<dyn Sender> {
    Arc::new(EmailSender::new())
}

fn sms_sender() -> Arc<dyn Sender> {
    Arc::new(SmsSender::new())
}

fn console_sender() -> Arc<dyn Sender> {
    Arc::new(ConsoleSender::new())
}

/// 内置发送器实现
pub fn builtin_factories() -> Vec<(&'static str, SenderFactory)> {
    vec![
        ("email", email_sender as SenderFactory),
        ("sms", sms_sender),
        ("console", console_sender),
    ]
}

/// 按实现名创建发送器实例
pub fn instantiate(implementation: &str) -> Option<Arc<dyn Sender>> {
    let implementation = normalize(implementation);
    builtin_factories()
        .into_iter()
        .find(|(name, _)| *name == implementation)
        .map(|(_, factory)| factory())
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

#[derive(Default)]
pub struct SenderRegistry {
    senders: DashMap<String, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置发送器，键为实现名
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for (name, factory) in builtin_factories() {
            registry.register(name, factory());
        }
        info!(
            sender_count = registry.len(),
            types = ?registry.registered_types(),
            "默认发送器初始化完成"
        );
        registry
    }

    /// 注册发送器，已存在的同名键会被替换
    pub fn register(&self, channel_type: &str, sender: Arc<dyn Sender>) {
        let key = normalize(channel_type);
        debug!(channel = %key, implementation = sender.channel_type(), "注册发送器");
        if self.senders.insert(key.clone(), sender).is_some() {
            warn!(channel = %key, "发送器已存在，旧实例被替换");
        }
    }

    /// 查找发送器，键缺失或未注册时返回不支持的渠道
    pub fn get(&self, channel_type: Option<&str>) -> Result<Arc<dyn Sender>, DispatchErrorKind> {
        let key = channel_type.map(normalize).unwrap_or_default();
        if key.is_empty() {
            return Err(DispatchErrorKind::UnsupportedChannel("<empty>".to_string()));
        }
        self.senders
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(DispatchErrorKind::UnsupportedChannel(key))
    }

    pub fn contains(&self, channel_type: &str) -> bool {
        self.senders.contains_key(&normalize(channel_type))
    }

    pub fn remove(&self, channel_type: &str) -> Option<Arc<dyn Sender>> {
        self.senders
            .remove(&normalize(channel_type))
            .map(|(_, sender)| sender)
    }

    /// 已注册的渠道键（排序）
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.senders.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// 销毁全部发送器并清空注册表
    pub async fn destroy_all(&self) {
        let senders: Vec<(String, Arc<dyn Sender>)> = self
            .senders
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        self.senders.clear();

        join_all(senders.iter().map(|(key, sender)| async move {
            sender.destroy().await;
            debug!(channel = %key, "发送器已销毁");
        }))
        .await;

        info!(count = senders.len(), "全部发送器已销毁");
    }
}
