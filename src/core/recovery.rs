//! Planner 侧错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供主循环决定是带提示重新规划还是终止本轮。
//! 能力执行失败不经过这里，它们由执行器转成错误信封并计入熔断器。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作（重试提示 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine {
    capability_names: Vec<String>,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提供已注册能力名，UnknownCapability 的重试提示中会列出
    pub fn with_capabilities(mut self, mut names: Vec<String>) -> Self {
        names.sort();
        self.capability_names = names;
        self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output was not valid JSON: {raw}. \
                To invoke capabilities output only JSON, either one object \
                {{\"capability\": \"name\", \"args\": {{...}}}} or an array of such objects. \
                To answer the user, output plain text without JSON."
            )),
            AgentError::UnknownCapability(name) => RecoveryAction::RetryWithPrompt(format!(
                "Capability '{name}' does not exist. Available capabilities: {}.",
                if self.capability_names.is_empty() {
                    "(none)".to_string()
                } else {
                    self.capability_names.join(", ")
                }
            )),
            AgentError::LlmError(_) | AgentError::ConfigError(_) | AgentError::CommandTable(_) => {
                RecoveryAction::Abort
            }
        }
    }
}
