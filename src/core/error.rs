//! 错误类型
//!
//! ReasoningError 描述一次推理调用的两类失败；AgentError 是编排层的致命错误，任何一种都会中止当前 run。
//! 命令执行失败（非零退出、超时）不是错误，而是 ExecutionOutcome 中的结构化状态。

use thiserror::Error;

/// 推理调用失败：输出不符合阶段 schema，或调用本身失败（网络、鉴权等）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// 编排过程中的致命错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),

    /// fail_closed 策略下，脱敏后的文本仍疑似含有敏感信息
    #[error("Unredacted secret suspected near: {0}")]
    UnredactedSecret(String),

    #[error("Capability failed: {0}")]
    Capability(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
