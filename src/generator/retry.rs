use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::utils::GenerationError;

/// 线性退避：第 n 次重试前等待 base_delay * n
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// 第 attempt 次失败之后的等待时间（attempt 从 1 开始），溢出时取 Duration::MAX
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(attempt)
            .unwrap_or(Duration::MAX)
    }

    /// 执行 op，限流和暂时不可用会重试，其它错误直接返回。
    /// 重试耗尽后返回最后一次的错误。
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} 调用失败 (尝试 {}/{}): {}",
                        operation, attempt, self.max_attempts, e
                    );
                    info!("{} 等待 {}ms 后重试...", operation, delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("{} 在 {} 次尝试后仍然失败: {}", operation, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        RetryPolicy::new(config.max_attempts, config.base_delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}
