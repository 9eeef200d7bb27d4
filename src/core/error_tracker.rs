//! 错误追踪与熔断
//!
//! 每次能力失败生成一条不可变的 ErrorRecord，写入有界历史（超出容量时淘汰最旧的），
//! 同时累加会话的连续失败计数；计数达到阈值即视为熔断。任何一次能力成功都会把计数清零。

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::capabilities::Diagnostic;
use crate::core::state::{SessionState, TraceEntry, TraceOutcome};
use crate::core::ErrorCategory;

/// 默认熔断阈值
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;
/// 默认错误历史容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// 一次失败调用的完整记录，创建后不再修改
#[derive(Clone, Debug, Serialize)]
pub struct ErrorRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub capability: String,
    pub category: ErrorCategory,
    pub message: String,
    pub trace: String,
    pub fault: Value,
    pub auto_fixed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ErrorRecord {
    /// 一行摘要（列表视图）
    pub fn summary(&self) -> String {
        format!(
            "#{} [{}] {} ({}): {}{}",
            self.id,
            self.timestamp.format("%H:%M:%S"),
            self.capability,
            self.category,
            self.message,
            if self.auto_fixed { " [auto-fixed]" } else { "" }
        )
    }

    /// 完整诊断（详情视图）
    pub fn detail(&self) -> String {
        let mut s = format!(
            "Error #{}\nTime: {}\nCapability: {}\nCategory: {}\nAuto-fixed: {}\nMessage: {}\n",
            self.id,
            self.timestamp.to_rfc3339(),
            self.capability,
            self.category,
            self.auto_fixed,
            self.message
        );
        if !self.fault.is_null() {
            s.push_str(&format!("Fault: {}\n", self.fault));
        }
        if let Some(ctx) = &self.context {
            s.push_str(&format!("Context: {}\n", ctx));
        }
        s.push_str("Trace:\n");
        s.push_str(&self.trace);
        s
    }
}

/// 错误追踪器：有界历史 + 熔断阈值；连续失败计数保存在 SessionState 中
#[derive(Debug)]
pub struct ErrorTracker {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
    threshold: u32,
    next_id: u64,
}

impl ErrorTracker {
    pub fn new(threshold: u32, capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            threshold: threshold.max(1),
            next_id: 1,
        }
    }

    /// 记录一次失败：生成 ErrorRecord、累加连续失败计数、写入执行轨迹；返回记录 id
    pub fn record_failure(
        &mut self,
        state: &mut SessionState,
        capability: &str,
        diagnostic: &Diagnostic,
        context: Option<Value>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let record = ErrorRecord {
            id,
            timestamp: Utc::now(),
            capability: capability.to_string(),
            category: diagnostic.category,
            message: diagnostic.message.clone(),
            trace: diagnostic.trace.clone(),
            fault: diagnostic.fault.clone(),
            auto_fixed: diagnostic.auto_fixed,
            context,
        };

        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);

        let count = state.increment_errors();
        state.push_trace(TraceEntry {
            capability: capability.to_string(),
            outcome: TraceOutcome::Failure,
            error_id: Some(id),
        });

        tracing::warn!(
            error_id = id,
            capability,
            category = %diagnostic.category,
            consecutive = count,
            "capability failure recorded"
        );
        if count >= self.threshold {
            tracing::warn!(consecutive = count, threshold = self.threshold, "circuit breaker tripped");
        }
        id
    }

    /// 记录一次成功：连续失败计数清零
    pub fn record_success(&self, state: &mut SessionState, capability: &str) {
        state.reset_errors();
        state.push_trace(TraceEntry {
            capability: capability.to_string(),
            outcome: TraceOutcome::Success,
            error_id: None,
        });
    }

    pub fn is_tripped(&self, state: &SessionState) -> bool {
        state.consecutive_errors() >= self.threshold
    }

    /// 最近 n 条记录（新的在前）
    pub fn recent(&self, n: usize) -> Vec<&ErrorRecord> {
        self.records.iter().rev().take(n).collect()
    }

    pub fn get(&self, id: u64) -> Option<&ErrorRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 按执行轨迹推断已被修复的失败：同一能力在该失败之后有过成功
    pub fn auto_fixed_ids(&self, state: &SessionState) -> Vec<u64> {
        let mut fixed = Vec::new();
        let mut succeeded_later: HashSet<&str> = HashSet::new();
        for entry in state.trace().iter().rev() {
            match entry.outcome {
                TraceOutcome::Success => {
                    succeeded_later.insert(entry.capability.as_str());
                }
                TraceOutcome::Failure => {
                    if succeeded_later.contains(entry.capability.as_str()) {
                        if let Some(id) = entry.error_id {
                            fixed.push(id);
                        }
                    }
                }
            }
        }
        fixed.sort_unstable();
        fixed
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD, DEFAULT_HISTORY_CAPACITY)
    }
}
