//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / kind / description / invoke），由 CapabilityRegistry 按名注册与查找，
//! CapabilityExecutor 调用时补齐默认参数、捕获失败并归一化为 Envelope。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::capabilities::{CapabilityKind, CapabilityOutput};

/// 能力 trait：名称、种类、描述（供模型理解）、参数 schema、默认参数、异步调用
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名称（模型输出 JSON 中的 "capability" 字段）
    fn name(&self) -> &str;

    fn kind(&self) -> CapabilityKind;

    /// 能力描述（供模型理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 默认参数；调用方未提供的键由此补齐
    fn default_args(&self) -> Map<String, Value> {
        Map::new()
    }

    /// 是否消费上游产物；为 true 时执行器会把会话最新产物填入 `artifact` 参数
    fn consumes_artifact(&self) -> bool {
        false
    }

    /// 调用能力。Err 表示能力内部异常，由执行器转为错误信封
    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<CapabilityOutput>;
}

/// 能力注册表：按名称存储 Arc<dyn Capability>
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: impl Capability + 'static) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn kind_of(&self, name: &str) -> Option<CapabilityKind> {
        self.capabilities.get(name).map(|c| c.kind())
    }

    /// 已注册能力名（排序后，保证 prompt 稳定）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// 生成能力 schema JSON，拼入 Planner 的 system prompt
    pub fn to_schema_json(&self) -> String {
        let capabilities: Vec<Value> = self
            .names()
            .iter()
            .filter_map(|name| self.capabilities.get(name))
            .map(|c| {
                serde_json::json!({
                    "name": c.name(),
                    "kind": c.kind(),
                    "description": c.description(),
                    "parameters": c.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&capabilities).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Capability for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Data
        }

        fn description(&self) -> &str {
            "Does nothing"
        }

        async fn invoke(&self, _args: Map<String, Value>) -> anyhow::Result<CapabilityOutput> {
            Ok(CapabilityOutput::success("ok", Value::Null))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Noop);
        assert_eq!(registry.kind_of("noop"), Some(CapabilityKind::Data));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }

    #[test]
    fn test_schema_json_contains_kind() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Noop);
        let schema: Value = serde_json::from_str(&registry.to_schema_json()).unwrap();
        assert_eq!(schema[0]["name"], "noop");
        assert_eq!(schema[0]["kind"], "data");
    }
}
