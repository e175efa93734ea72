//! 通知分发核心
//!
//! 接收与渠道无关的发送请求，依次经过策略门、模板渲染、发送器初始化、
//! 拦截器与重试，最终交给对应渠道的发送器投递。
//!
//! ```ignore
//! let dispatcher = bootstrap::build_dispatcher(&config, None)?;
//! let request = SendRequest::new("r1", "email", "user@x.com", "hi ${name}")
//!     .with_variable("name", "Ann");
//! let result = dispatcher.dispatch(request).await?;
//! ```

pub mod bootstrap;
pub mod config_source;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod interceptor;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod sender;
pub mod template;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{DispatchError, DispatchErrorKind};
pub use template::render;
pub use types::{SendRequest, SendResult, SenderConfiguration};
