//! 发送重试
//!
//! 在共享的重试执行器之上统计发送器的物理调用次数，
//! 只有标记为可重试的失败才会再次调用发送器。

use notify_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::SendFailure;
use crate::sender::Sender;
use crate::types::{Delivery, OutboundMessage};

/// 带重试的发送结果，附带实际调用次数
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

pub async fn send_with_retry(
    sender: &dyn Sender,
    message: &OutboundMessage,
    policy: &RetryPolicy,
) -> Result<Attempted<Delivery>, Attempted<SendFailure>> {
    let mut attempts: u32 = 0;
    let operation_name = format!("send:{}", sender.channel_type());

    let outcome = retry_with_policy(policy, &operation_name, SendFailure::is_retryable, || {
        attempts += 1;
        sender.send(message)
    })
    .await;

    match outcome {
        Ok(value) => Ok(Attempted { value, attempts }),
        Err(value) => Err(Attempted { value, attempts }),
    }
}
