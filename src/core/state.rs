//! 会话状态与阶段状态机
//!
//! SessionState 是单个会话的唯一权威记录：历史、最新产物、参数快照、连续失败计数、执行轨迹、分析缓存。
//! 完整路径与快速通道都只通过这里的方法读写，SessionSnapshot 是给观测面用的只读投影。

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::capabilities::{ArtifactHandle, CapabilityKind};
use crate::memory::{ConversationMemory, Message};

/// 单轮编排阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    AwaitingInput,
    Planning,
    ExecutingData,
    ExecutingVisualization,
    ExecutingStatistics,
    ExecutingReport,
    CircuitOpen,
    Terminal,
}

impl AgentPhase {
    pub fn executing(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Data => AgentPhase::ExecutingData,
            CapabilityKind::Visualization => AgentPhase::ExecutingVisualization,
            CapabilityKind::Statistics => AgentPhase::ExecutingStatistics,
            CapabilityKind::Report => AgentPhase::ExecutingReport,
        }
    }

    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            AgentPhase::ExecutingData
                | AgentPhase::ExecutingVisualization
                | AgentPhase::ExecutingStatistics
                | AgentPhase::ExecutingReport
        )
    }

    /// 合法迁移：AwaitingInput -> Planning | Terminal；Planning -> Executing* | Terminal | CircuitOpen；
    /// Executing* -> Planning | CircuitOpen；CircuitOpen -> Terminal
    pub fn can_transition_to(&self, next: AgentPhase) -> bool {
        match self {
            AgentPhase::AwaitingInput => {
                matches!(next, AgentPhase::Planning | AgentPhase::Terminal)
            }
            AgentPhase::Planning => {
                next.is_executing()
                    || matches!(next, AgentPhase::Terminal | AgentPhase::CircuitOpen)
            }
            AgentPhase::ExecutingData
            | AgentPhase::ExecutingVisualization
            | AgentPhase::ExecutingStatistics
            | AgentPhase::ExecutingReport => {
                matches!(next, AgentPhase::Planning | AgentPhase::CircuitOpen)
            }
            AgentPhase::CircuitOpen => next == AgentPhase::Terminal,
            AgentPhase::Terminal => false,
        }
    }
}

/// 单轮内经过的阶段序列，起点总是 AwaitingInput
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTrail {
    phases: Vec<AgentPhase>,
}

impl PhaseTrail {
    pub fn new() -> Self {
        Self {
            phases: vec![AgentPhase::AwaitingInput],
        }
    }

    pub fn current(&self) -> AgentPhase {
        self.phases.last().copied().unwrap_or(AgentPhase::AwaitingInput)
    }

    pub fn advance(&mut self, next: AgentPhase) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "illegal phase transition {:?} -> {:?}",
            current,
            next
        );
        tracing::debug!(from = ?current, to = ?next, "phase");
        self.phases.push(next);
    }

    pub fn phases(&self) -> &[AgentPhase] {
        &self.phases
    }

    pub fn into_phases(self) -> Vec<AgentPhase> {
        self.phases
    }
}

impl Default for PhaseTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// 可视化参数快照：参数表始终带着它所属的能力 id
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParameterSnapshot {
    pub capability: String,
    pub params: Map<String, Value>,
}

impl ParameterSnapshot {
    pub fn new(capability: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            capability: capability.into(),
            params,
        }
    }

    /// 覆盖单个键，其余键保持不变
    pub fn with_value(&self, name: &str, value: Value) -> Self {
        let mut params = self.params.clone();
        params.insert(name.to_string(), value);
        Self {
            capability: self.capability.clone(),
            params,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Success,
    Failure,
}

/// 执行轨迹条目
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceEntry {
    pub capability: String,
    pub outcome: TraceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<u64>,
}

/// 默认执行轨迹容量
pub const DEFAULT_TRACE_CAPACITY: usize = 200;

/// 单个会话的完整状态
#[derive(Debug, Clone)]
pub struct SessionState {
    history: ConversationMemory,
    latest_artifact: Option<ArtifactHandle>,
    parameters: Option<ParameterSnapshot>,
    consecutive_errors: u32,
    trace: VecDeque<TraceEntry>,
    trace_capacity: usize,
    analysis_outputs: BTreeMap<String, String>,
    turn: u64,
}

impl SessionState {
    pub fn new(max_messages: usize) -> Self {
        Self {
            history: ConversationMemory::new(max_messages),
            latest_artifact: None,
            parameters: None,
            consecutive_errors: 0,
            trace: VecDeque::new(),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            analysis_outputs: BTreeMap::new(),
            turn: 0,
        }
    }

    /// 轨迹超出容量时丢弃最旧的条目
    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity.max(1);
        self
    }

    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn push_message(&mut self, msg: Message) {
        self.history.push(msg);
    }

    pub fn latest_artifact(&self) -> Option<&ArtifactHandle> {
        self.latest_artifact.as_ref()
    }

    pub fn set_latest_artifact(&mut self, handle: ArtifactHandle) {
        self.latest_artifact = Some(handle);
    }

    pub fn parameter_snapshot(&self) -> Option<&ParameterSnapshot> {
        self.parameters.as_ref()
    }

    pub fn set_parameter_snapshot(&mut self, snapshot: ParameterSnapshot) {
        self.parameters = Some(snapshot);
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub(crate) fn increment_errors(&mut self) -> u32 {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.consecutive_errors
    }

    pub(crate) fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn trace(&self) -> &VecDeque<TraceEntry> {
        &self.trace
    }

    pub(crate) fn push_trace(&mut self, entry: TraceEntry) {
        if self.trace.len() >= self.trace_capacity {
            self.trace.pop_front();
        }
        self.trace.push_back(entry);
    }

    pub fn analysis_output(&self, variant: &str) -> Option<&str> {
        self.analysis_outputs.get(variant).map(String::as_str)
    }

    pub fn cached_variants(&self) -> Vec<String> {
        self.analysis_outputs.keys().cloned().collect()
    }

    /// 统计重算时整体替换分析缓存，不与旧变体合并
    pub fn replace_analysis_outputs(&mut self, outputs: BTreeMap<String, String>) {
        self.analysis_outputs = outputs;
    }

    pub fn invalidate_analysis_outputs(&mut self) {
        self.analysis_outputs.clear();
    }

    /// 报告生成写入本代统计下的变体
    pub fn store_report_variants(&mut self, variants: BTreeMap<String, String>) {
        self.analysis_outputs.extend(variants);
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// 新的用户输入：轮次加一，熔断计数清零
    pub fn begin_turn(&mut self) {
        self.turn += 1;
        self.consecutive_errors = 0;
    }

    /// 清空会话；句柄在重置后不再视为有效
    pub fn reset(&mut self) {
        self.history.clear();
        self.latest_artifact = None;
        self.parameters = None;
        self.consecutive_errors = 0;
        self.trace.clear();
        self.analysis_outputs.clear();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            turn: self.turn,
            history_len: self.history.len(),
            latest_artifact: self.latest_artifact.clone(),
            parameters: self.parameters.clone(),
            consecutive_errors: self.consecutive_errors,
            trace_len: self.trace.len(),
            cached_variants: self.cached_variants(),
        }
    }
}

/// 观测面看到的只读投影
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub turn: u64,
    pub history_len: usize,
    pub latest_artifact: Option<ArtifactHandle>,
    pub parameters: Option<ParameterSnapshot>,
    pub consecutive_errors: u32,
    pub trace_len: usize,
    pub cached_variants: Vec<String>,
}
