//! 能力调用 JSON Schema 生成（schemars）
//!
//! 将「合法调用批次」的 JSON 结构注入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 单个能力调用：与 Planner 解析的 `{"capability": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct CapabilityCallFormat {
    /// 能力名，如 generate_data、render_chart、compute_statistics、generate_report
    pub capability: String,
    /// 扁平命名参数
    pub args: HashMap<String, serde_json::Value>,
}

/// 有序调用批次；按数组顺序逐个执行
#[allow(dead_code)]
#[derive(JsonSchema)]
struct CapabilityBatchFormat {
    pub calls: Vec<CapabilityCallFormat>,
}

/// 返回调用批次的 JSON Schema 字符串，可拼入 system prompt
pub fn capability_call_schema_json() -> String {
    let schema = schema_for!(CapabilityBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_capability_field() {
        let schema = capability_call_schema_json();
        assert!(schema.contains("capability"));
        assert!(schema.contains("calls"));
    }
}
