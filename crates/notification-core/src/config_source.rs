//! 渠道配置来源
//!
//! 分发器在发送器首次使用时从这里拉取配置。默认实现由启动配置中的
//! `channels` 构建，需要从数据库或配置中心加载时替换为其他实现即可。

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use notify_shared::config::ChannelConfig;
use notify_shared::error::Result;

use crate::types::SenderConfiguration;

#[async_trait]
pub trait SenderConfigSource: Send + Sync {
    /// 读取指定渠道键的配置，不存在时返回 None
    async fn load(&self, channel_type: &str) -> Result<Option<SenderConfiguration>>;
}

/// 内存中的静态配置
#[derive(Default)]
pub struct StaticConfigSource {
    configs: RwLock<HashMap<String, SenderConfiguration>>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由启动配置构建，跳过未启用的渠道
    pub fn from_channels(channels: &[ChannelConfig]) -> Self {
        let source = Self::new();
        for channel in channels.iter().filter(|c| c.enabled) {
            source.insert(SenderConfiguration::from(channel));
        }
        source
    }

    /// 新增或替换一个渠道的配置
    pub fn insert(&self, config: SenderConfiguration) {
        let key = config.channel_type.trim().to_lowercase();
        self.configs.write().insert(key, config);
    }

    pub fn len(&self) -> usize {
        self.configs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.read().is_empty()
    }
}

#[async_trait]
impl SenderConfigSource for StaticConfigSource {
    async fn load(&self, channel_type: &str) -> Result<Option<SenderConfiguration>> {
        Ok(self
            .configs
            .read()
            .get(&channel_type.trim().to_lowercase())
            .cloned())
    }
}
