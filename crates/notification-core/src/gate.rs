//! 发送器配置闸门
//!
//! 每个发送器持有一个闸门：最新配置总是无条件替换（支持热更新），
//! 而一次性初始化在并发调用下只执行一次。快速路径只读原子标志，
//! 慢速路径在互斥锁内二次检查。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::types::SenderConfiguration;

#[derive(Default)]
pub struct ConfigurationGate {
    current: ArcSwapOption<SenderConfiguration>,
    configured: AtomicBool,
    setup_lock: Mutex<()>,
}

impl ConfigurationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存储配置，首次调用时执行初始化
    ///
    /// 初始化失败时标志保持未配置，下次调用会再次尝试；
    /// 已存储的配置不会回滚。
    pub fn configure<F>(
        &self,
        config: SenderConfiguration,
        setup: F,
    ) -> Result<(), ConfigurationError>
    where
        F: FnOnce(&SenderConfiguration) -> anyhow::Result<()>,
    {
        let config = Arc::new(config);
        self.current.store(Some(Arc::clone(&config)));

        if self.configured.load(Ordering::Acquire) {
            debug!(channel = %config.channel_type, "配置已更新，跳过初始化");
            return Ok(());
        }

        let _guard = self.setup_lock.lock();
        if self.configured.load(Ordering::Acquire) {
            return Ok(());
        }

        setup(&config)
            .map_err(|e| ConfigurationError::new(&config.channel_type, format!("{e:#}")))?;
        self.configured.store(true, Ordering::Release);

        info!(channel = %config.channel_type, "发送器初始化完成");
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// 已完成初始化时返回最新配置
    pub fn configuration(&self) -> Option<Arc<SenderConfiguration>> {
        if self.is_configured() {
            self.current.load_full()
        } else {
            None
        }
    }

    /// 最近一次存储的配置，不论初始化是否成功
    pub fn latest(&self) -> Option<Arc<SenderConfiguration>> {
        self.current.load_full()
    }

    /// 回到未配置状态，用于销毁发送器
    pub fn reset(&self) {
        let _guard = self.setup_lock.lock();
        self.configured.store(false, Ordering::Release);
        self.current.store(None);
    }
}
