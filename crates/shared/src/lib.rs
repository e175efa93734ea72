//! 共享库
//!
//! 通知服务共用的配置加载、错误处理、Redis 缓存、重试策略与可观测性基础设施。

pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
