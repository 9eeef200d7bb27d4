//! 错误类型、能力错误分类与恢复动作
//!
//! AgentError 只描述 Planner 侧与装配期的错误；能力执行失败在执行器边界被转为错误信封，
//! 不会以 AgentError 的形式向上传播。RecoveryEngine 根据 AgentError 给出 RecoveryAction。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 编排过程中可能出现的错误（模型输出解析、未知能力、模型调用、配置）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Command table error: {0}")]
    CommandTable(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重新规划（JSON 格式错误、调用了不存在的能力）
    RetryWithPrompt(String),
    /// 终止当前轮次
    Abort,
}

/// 能力失败的分类（写入 ErrorRecord）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 参数缺失或类型不符
    InvalidArguments,
    /// 需要上游产物但会话中尚无
    MissingArtifact,
    /// 能力返回 Err
    ExecutionFailed,
    /// 能力内部 panic
    Panicked,
    /// 注册表中不存在该能力
    UnknownCapability,
    /// 能力自行返回 status=error 及诊断
    CapabilityReported,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::InvalidArguments => "invalid_arguments",
            ErrorCategory::MissingArtifact => "missing_artifact",
            ErrorCategory::ExecutionFailed => "execution_failed",
            ErrorCategory::Panicked => "panicked",
            ErrorCategory::UnknownCapability => "unknown_capability",
            ErrorCategory::CapabilityReported => "capability_reported",
        };
        f.write_str(s)
    }
}
