//! Rollout 错误类型
//!
//! 只有不可恢复的情况才走 Err：沙箱构造失败、推理引擎失败、调用方取消。
//! 解析失败与工具/沙箱执行失败都会被转成文本型环境回复（"Error: ..."），不在这里出现。

use thiserror::Error;

/// Rollout 过程中会向调用方传播的错误
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Inference failed: {0}")]
    Inference(String),

    /// 推理引擎返回的 completion 数量与本轮存活轨迹数不一致
    #[error("Inference returned {actual} completions for {expected} conversations")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// 沙箱/会话构造失败（如无法创建内核），轨迹无法继续
    #[error("Sandbox init failed: {0}")]
    SandboxInit(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 调用方在两轮之间取消了整个 rollout
    #[error("Rollout cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for RolloutError {
    fn from(e: reqwest::Error) -> Self {
        RolloutError::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RolloutError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RolloutError::WebSocket(e.to_string())
    }
}

impl From<config::ConfigError> for RolloutError {
    fn from(e: config::ConfigError) -> Self {
        RolloutError::Config(e.to_string())
    }
}
