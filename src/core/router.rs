//! 路由器
//!
//! 根据最近产生的消息与熔断状态决定下一步：熔断优先于一切；终止回复结束本轮；
//! 能力调用按种类分派到对应执行器；执行器刚结束时一律回到 Planning。

use crate::capabilities::{CapabilityCall, CapabilityKind};

/// Planner 产生的消息（封闭的标签类型，路由分派可穷尽检查）
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerMessage {
    Reply(String),
    DataCall(CapabilityCall),
    VisualizationCall(CapabilityCall),
    StatisticsCall(CapabilityCall),
    ReportCall(CapabilityCall),
}

impl PlannerMessage {
    pub fn call(kind: CapabilityKind, call: CapabilityCall) -> Self {
        match kind {
            CapabilityKind::Data => PlannerMessage::DataCall(call),
            CapabilityKind::Visualization => PlannerMessage::VisualizationCall(call),
            CapabilityKind::Statistics => PlannerMessage::StatisticsCall(call),
            CapabilityKind::Report => PlannerMessage::ReportCall(call),
        }
    }

    pub fn capability_call(&self) -> Option<&CapabilityCall> {
        match self {
            PlannerMessage::Reply(_) => None,
            PlannerMessage::DataCall(c)
            | PlannerMessage::VisualizationCall(c)
            | PlannerMessage::StatisticsCall(c)
            | PlannerMessage::ReportCall(c) => Some(c),
        }
    }
}

/// 路由器看到的最近一条消息
#[derive(Debug, Clone, Copy)]
pub enum LastMessage<'a> {
    /// Planner 的输出（回复或一次能力调用）
    Planner(&'a PlannerMessage),
    /// 能力执行结果
    Observation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// 回到 Planner Dispatch
    Plan,
    /// 分派到对应种类的执行器
    Execute(CapabilityKind),
    /// 本轮正常结束
    Finish,
    /// 熔断：强制结束本轮并附带用户可见说明
    CircuitOpen { explanation: String },
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    threshold: u32,
}

impl Router {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn route(&self, last: LastMessage<'_>, consecutive_errors: u32) -> Route {
        if consecutive_errors >= self.threshold {
            return Route::CircuitOpen {
                explanation: circuit_explanation(consecutive_errors, self.threshold),
            };
        }
        match last {
            LastMessage::Observation => Route::Plan,
            LastMessage::Planner(PlannerMessage::Reply(_)) => Route::Finish,
            LastMessage::Planner(PlannerMessage::DataCall(_)) => Route::Execute(CapabilityKind::Data),
            LastMessage::Planner(PlannerMessage::VisualizationCall(_)) => {
                Route::Execute(CapabilityKind::Visualization)
            }
            LastMessage::Planner(PlannerMessage::StatisticsCall(_)) => {
                Route::Execute(CapabilityKind::Statistics)
            }
            LastMessage::Planner(PlannerMessage::ReportCall(_)) => Route::Execute(CapabilityKind::Report),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(crate::core::error_tracker::DEFAULT_ERROR_THRESHOLD)
    }
}

fn circuit_explanation(count: u32, threshold: u32) -> String {
    format!(
        "I stopped this request after {count} consecutive capability failures (limit {threshold}). \
        No further capabilities will run for this message. Use /errors to inspect what went wrong, \
        then rephrase or adjust the request and try again."
    )
}
