//! 单轮过程事件：供 REPL 等前端展示规划、能力调用、观察、熔断与快速通道

use serde::Serialize;

use crate::capabilities::{CapabilityKind, Status};

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 正在调用模型规划（第几步）
    Planning { step: usize, max_steps: usize },
    /// 模型给出一批调用
    BatchPlanned { capabilities: Vec<String> },
    /// 开始执行能力
    CapabilityCall {
        capability: String,
        kind: CapabilityKind,
        args: serde_json::Value,
    },
    /// 能力返回（预览，避免过长）
    Observation {
        capability: String,
        status: Status,
        preview: String,
    },
    /// 规划失败后的恢复动作
    Recovery { action: String, detail: String },
    /// 快速通道命中并完成
    HybridServed { command: String },
    /// 快速通道缺少前置条件，回退到完整路径
    Fallback { reason: String },
    /// 熔断
    CircuitOpen { explanation: String },
    /// 本轮最终回复
    Reply { text: String },
}

pub(crate) fn send_event(
    tx: Option<&tokio::sync::mpsc::UnboundedSender<TurnEvent>>,
    ev: TurnEvent,
) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 截断到 max 个字符，超出时加省略号
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}
