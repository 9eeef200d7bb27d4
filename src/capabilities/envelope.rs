//! 能力调用的请求与结果类型
//!
//! CapabilityOutput 是外部能力返回的原始结果（含侧车快照与诊断），
//! Envelope 是执行器归一化后的结果 `{status, message, payload}`，写入对话历史。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capabilities::ArtifactHandle;
use crate::core::ErrorCategory;

/// 能力种类：决定由哪个执行器处理、更新哪一块会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Data,
    Visualization,
    Statistics,
    Report,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapabilityKind::Data => "data",
            CapabilityKind::Visualization => "visualization",
            CapabilityKind::Statistics => "statistics",
            CapabilityKind::Report => "report",
        };
        f.write_str(s)
    }
}

/// 单次能力调用请求（能力名 + 扁平命名参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub capability: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl CapabilityCall {
    pub fn new(capability: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            capability: capability.into(),
            args,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// 失败能力附带的诊断信息，供 ErrorTracker 生成 ErrorRecord
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub category: ErrorCategory,
    pub message: String,
    /// 原始故障对象（结构化）
    pub fault: Value,
    /// 完整诊断链
    pub trace: String,
    /// 能力已自行修正输入后仍报告该故障
    pub auto_fixed: bool,
}

impl Diagnostic {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            category,
            trace: message.clone(),
            message,
            fault: Value::Null,
            auto_fixed: false,
        }
    }

    pub fn with_fault(mut self, fault: Value) -> Self {
        self.fault = fault;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    pub fn auto_fixed(mut self, fixed: bool) -> Self {
        self.auto_fixed = fixed;
        self
    }
}

/// 外部能力的原始返回
#[derive(Debug, Clone)]
pub struct CapabilityOutput {
    pub status: Status,
    pub message: String,
    pub payload: Value,
    /// 新产出的数据/图像句柄
    pub artifact: Option<ArtifactHandle>,
    /// 可视化能力的参数快照侧车
    pub parameters: Option<Map<String, Value>>,
    /// 报告/统计能力产出的变体文本（variant -> text）
    pub records: Option<BTreeMap<String, String>>,
    pub diagnostic: Option<Diagnostic>,
}

impl CapabilityOutput {
    pub fn success(message: impl Into<String>, payload: Value) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            payload,
            artifact: None,
            parameters: None,
            records: None,
            diagnostic: None,
        }
    }

    /// 能力自行报告失败；message 取诊断的消息
    pub fn error(diagnostic: Diagnostic) -> Self {
        Self {
            status: Status::Error,
            message: diagnostic.message.clone(),
            payload: Value::Null,
            artifact: None,
            parameters: None,
            records: None,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn with_artifact(mut self, handle: ArtifactHandle) -> Self {
        self.artifact = Some(handle);
        self
    }

    pub fn with_parameters(mut self, params: Map<String, Value>) -> Self {
        self.parameters = Some(params);
        self
    }

    pub fn with_records(mut self, records: BTreeMap<String, String>) -> Self {
        self.records = Some(records);
        self
    }
}

/// 归一化结果信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub capability: String,
    pub status: Status,
    pub message: String,
    #[serde(default)]
    pub payload: Value,
    /// 失败时对应的 ErrorRecord id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<u64>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
