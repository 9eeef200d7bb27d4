//! Planner：调用模型并解析为终止回复或有序的能力调用批次
//!
//! system prompt = 基础提示 + 已注册能力的 schema + 调用批次 JSON Schema；
//! parse_llm_output 从模型文本中提取 JSON 并解析为 PlannerOutput。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::capabilities::{capability_call_schema_json, CapabilityCall, CapabilityRegistry};
use crate::core::router::PlannerMessage;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a data analysis assistant. \
You can generate datasets, render charts, compute statistics and write reports by invoking capabilities. \
Later capabilities automatically receive the artifact produced by earlier ones.";

/// 模型输出中的单个调用（兼容 "tool" 字段名）
#[derive(Debug, Deserialize)]
struct RawCall {
    #[serde(alias = "tool")]
    capability: String,
    #[serde(default)]
    args: Map<String, Value>,
}

/// 解析后的模型输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 直接回复用户
    Reply(String),
    /// 按顺序执行的调用批次（非空）
    Calls(Vec<CapabilityCall>),
}

/// 解析模型输出：以 JSON 开头（或含 ```json 代码块）视为调用批次，否则为回复
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
        trimmed
    } else {
        return Ok(PlannerOutput::Reply(trimmed.to_string()));
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    let raw_calls: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("calls") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(AgentError::JsonParseError(format!(
                    "\"calls\" must be an array: {}",
                    json_str
                )))
            }
            None => vec![Value::Object(obj)],
        },
        _ => {
            return Err(AgentError::JsonParseError(format!(
                "expected an object or array: {}",
                json_str
            )))
        }
    };

    if raw_calls.is_empty() {
        return Err(AgentError::JsonParseError("empty call batch".to_string()));
    }

    let mut calls = Vec::with_capacity(raw_calls.len());
    for raw in raw_calls {
        let parsed: RawCall = serde_json::from_value(raw)
            .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
        if parsed.capability.trim().is_empty() {
            return Err(AgentError::JsonParseError(format!(
                "empty capability name: {}",
                json_str
            )));
        }
        calls.push(CapabilityCall::new(parsed.capability.trim(), parsed.args));
    }
    Ok(PlannerOutput::Calls(calls))
}

/// Planner Dispatch 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerDecision {
    Reply(String),
    /// 已按能力种类打好标签的调用，保持模型给出的顺序
    Batch(Vec<PlannerMessage>),
}

/// Planner：持有 LLM 与 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    /// 用基础提示与注册表生成完整 system prompt
    pub fn new(llm: Arc<dyn LlmClient>, base_prompt: impl Into<String>, registry: &CapabilityRegistry) -> Self {
        let system_prompt = format!(
            "{}\n\n## Capabilities\n{}\n\n## Invocation format\n\
            Answer in plain text when no capability is needed. Otherwise output only JSON: \
            one object {{\"capability\": \"name\", \"args\": {{...}}}}, an array of such objects, \
            or {{\"calls\": [...]}}. Calls run in order.\n{}",
            base_prompt.into(),
            registry.to_schema_json(),
            capability_call_schema_json()
        );
        Self { llm, system_prompt }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 调用模型，返回回复或已标注种类的调用批次；未注册的能力名返回 UnknownCapability
    pub async fn dispatch(
        &self,
        history: &[Message],
        registry: &CapabilityRegistry,
    ) -> Result<PlannerDecision, AgentError> {
        let mut full_messages = Vec::with_capacity(history.len() + 1);
        full_messages.push(Message::system(self.system_prompt.clone()));
        full_messages.extend(history.iter().cloned());

        let output = self
            .llm
            .complete(&full_messages)
            .await
            .map_err(AgentError::LlmError)?;
        tracing::debug!(output = %output, "planner output");

        match parse_llm_output(&output)? {
            PlannerOutput::Reply(text) => Ok(PlannerDecision::Reply(text)),
            PlannerOutput::Calls(calls) => {
                let mut batch = Vec::with_capacity(calls.len());
                for call in calls {
                    let kind = registry
                        .kind_of(&call.capability)
                        .ok_or_else(|| AgentError::UnknownCapability(call.capability.clone()))?;
                    batch.push(PlannerMessage::call(kind, call));
                }
                Ok(PlannerDecision::Batch(batch))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_reply() {
        let out = parse_llm_output("  The mean is 3.2 {approx}  ").unwrap();
        assert_eq!(out, PlannerOutput::Reply("The mean is 3.2 {approx}".into()));
    }

    #[test]
    fn test_single_object() {
        let out = parse_llm_output(r#"{"capability": "render_chart", "args": {"bins": 10}}"#).unwrap();
        match out {
            PlannerOutput::Calls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].capability, "render_chart");
                assert_eq!(calls[0].args["bins"], 10);
            }
            _ => panic!("Expected Calls"),
        }
    }

    #[test]
    fn test_array_preserves_order() {
        let out = parse_llm_output(
            r#"[{"capability": "generate_data"}, {"tool": "compute_statistics", "args": {}}]"#,
        )
        .unwrap();
        match out {
            PlannerOutput::Calls(calls) => {
                let names: Vec<&str> = calls.iter().map(|c| c.capability.as_str()).collect();
                assert_eq!(names, vec!["generate_data", "compute_statistics"]);
            }
            _ => panic!("Expected Calls"),
        }
    }

    #[test]
    fn test_fenced_calls_object() {
        let out = parse_llm_output(
            "Sure:\n```json\n{\"calls\": [{\"capability\": \"generate_report\"}]}\n```",
        )
        .unwrap();
        assert!(matches!(out, PlannerOutput::Calls(ref c) if c.len() == 1));
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            parse_llm_output(r#"{"capability": "render_chart""#),
            Err(AgentError::JsonParseError(_))
        ));
        assert!(matches!(parse_llm_output("[]"), Err(AgentError::JsonParseError(_))));
        assert!(matches!(
            parse_llm_output(r#"{"args": {}}"#),
            Err(AgentError::JsonParseError(_))
        ));
    }
}
