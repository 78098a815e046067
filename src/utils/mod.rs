pub mod activity;
pub mod logger;
pub mod scheduler;

use thiserror::Error;

/// 上游失败分类，决定是否重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    TemporarilyUnavailable,
    Other,
}

/// 生成服务调用错误
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("请求被限流: {0}")]
    RateLimited(String),

    #[error("服务暂时不可用: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl GenerationError {
    pub fn class(&self) -> FailureClass {
        match self {
            GenerationError::RateLimited(_) => FailureClass::RateLimited,
            GenerationError::Unavailable(_) => FailureClass::TemporarilyUnavailable,
            GenerationError::Configuration(_) | GenerationError::Other(_) => FailureClass::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != FailureClass::Other
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            GenerationError::Unavailable(e.to_string())
        } else {
            GenerationError::Other(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(e: serde_json::Error) -> Self {
        GenerationError::Other(format!("响应JSON解析失败: {}", e))
    }
}

/// 单次生成周期的失败，调度层只会看到这一类错误
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("{0}")]
    ContentGeneration(String),

    #[error("存储错误: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<GenerationError> for CycleError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Configuration(msg) => CycleError::Configuration(msg),
            other => CycleError::ContentGeneration(other.to_string()),
        }
    }
}
