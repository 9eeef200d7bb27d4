//! 对话会话
//!
//! 每轮：熔断计数清零 -> 命令匹配 -> 命中则走快速通道，否则（或快速通道要求回退时）走完整路径。
//! 会话独占 SessionState 与 ErrorTracker，所有入口都是 `&mut self`。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::capabilities::{artifact_of, ArtifactStore, CapabilityExecutor, Envelope};
use crate::commands::{CommandMatcher, SimpleCommand};
use crate::core::error_tracker::ErrorRecord;
use crate::core::hybrid::{FallbackReason, HybridExecutor, HybridOutcome};
use crate::core::router::Router;
use crate::core::state::{AgentPhase, PhaseTrail, SessionSnapshot, SessionState};
use crate::core::{AgentError, ErrorTracker, RecoveryEngine};
use crate::memory::Message;
use crate::react::events::{send_event, TurnEvent};
use crate::react::loop_::FullPath;
use crate::react::planner::Planner;

/// 本轮走的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Hybrid,
    Full,
}

/// 单轮结果
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub path: ExecutionPath,
    pub phases: Vec<AgentPhase>,
    pub envelopes: Vec<Envelope>,
    pub circuit_open: bool,
    /// 快速通道命中但缺少前置条件时的原因
    pub fallback: Option<FallbackReason>,
}

pub struct ConversationSession {
    pub(crate) state: SessionState,
    pub(crate) errors: ErrorTracker,
    pub(crate) executor: CapabilityExecutor,
    pub(crate) planner: Planner,
    pub(crate) router: Router,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) matcher: CommandMatcher,
    pub(crate) hybrid: HybridExecutor,
    pub(crate) max_steps: usize,
    pub(crate) event_tx: Option<UnboundedSender<TurnEvent>>,
    /// 内置能力共享的产物仓库；reset 时一并清空
    pub(crate) store: Arc<ArtifactStore>,
}

impl ConversationSession {
    /// 处理一条用户输入
    pub async fn handle_turn(&mut self, input: &str) -> Result<TurnOutcome, AgentError> {
        self.state.begin_turn();
        let mut trail = PhaseTrail::new();
        let mut fallback = None;

        if let Some(command) = self.matcher.match_input(input) {
            tracing::debug!(?command, "command matched");
            let outcome = self
                .hybrid
                .execute(&command, &self.executor, &mut self.state, &mut self.errors)
                .await;
            match self.serve_hybrid(input, &command, outcome, &mut trail) {
                Ok(served) => return Ok(served),
                Err(reason) => {
                    tracing::info!(reason = %reason, "hybrid path unavailable, running full path");
                    send_event(self.event_tx.as_ref(), TurnEvent::Fallback {
                        reason: reason.to_string(),
                    });
                    fallback = Some(reason);
                }
            }
        }

        let full = FullPath::new(&self.planner, &self.executor, &self.router, &self.recovery)
            .with_max_steps(self.max_steps)
            .with_event_tx(self.event_tx.as_ref());
        let result = full
            .run(&mut self.state, &mut self.errors, &mut trail, input)
            .await?;

        Ok(TurnOutcome {
            reply: result.reply,
            path: ExecutionPath::Full,
            phases: trail.into_phases(),
            envelopes: result.envelopes,
            circuit_open: result.circuit_open,
            fallback,
        })
    }

    /// 快速通道收尾：写入一对合成的 user/assistant 消息；需要回退时返回原因
    fn serve_hybrid(
        &mut self,
        input: &str,
        command: &SimpleCommand,
        outcome: HybridOutcome,
        trail: &mut PhaseTrail,
    ) -> Result<TurnOutcome, FallbackReason> {
        let (reply, envelopes) = match outcome {
            HybridOutcome::FallbackRequired(reason) => return Err(reason),
            HybridOutcome::Updated { envelope, snapshot } => {
                let (name, value) = match command {
                    SimpleCommand::UpdateParameter { name, value } => (name.as_str(), value.clone()),
                    SimpleCommand::RetrieveReport { .. } => ("", Value::Null),
                };
                let artifact = artifact_of(&envelope)
                    .map(|h| format!(" New artifact: {}.", h))
                    .unwrap_or_default();
                let reply = format!(
                    "Updated {} to {} and re-rendered with {}.{}",
                    name, value, snapshot.capability, artifact
                );
                (reply, vec![envelope])
            }
            HybridOutcome::Retrieved { text, .. } => (text, Vec::new()),
            HybridOutcome::Failed { envelope } => {
                let reference = envelope
                    .error_id
                    .map(|id| format!(" See /error {} for details.", id))
                    .unwrap_or_default();
                let reply = format!(
                    "Could not apply the change: {}. The previous settings are unchanged.{}",
                    envelope.message, reference
                );
                (reply, vec![envelope])
            }
        };

        self.state.push_message(Message::user(input));
        let payload = serde_json::to_value(command).unwrap_or(Value::Null);
        self.state
            .push_message(Message::assistant(reply.clone()).with_payload(payload.clone()));
        trail.advance(AgentPhase::Terminal);
        send_event(self.event_tx.as_ref(), TurnEvent::HybridServed {
            command: payload.to_string(),
        });
        send_event(self.event_tx.as_ref(), TurnEvent::Reply { text: reply.clone() });

        Ok(TurnOutcome {
            reply,
            path: ExecutionPath::Hybrid,
            phases: std::mem::take(trail).into_phases(),
            envelopes,
            circuit_open: false,
            fallback: None,
        })
    }

    /// 最近 n 条错误摘要（新的在前）
    pub fn recent_errors(&self, n: usize) -> Vec<&ErrorRecord> {
        self.errors.recent(n)
    }

    /// 单条错误的完整诊断文本
    pub fn error_detail(&self, id: u64) -> Option<String> {
        self.errors.get(id).map(ErrorRecord::detail)
    }

    pub fn auto_fixed_ids(&self) -> Vec<u64> {
        self.errors.auto_fixed_ids(&self.state)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    /// 清空会话状态与产物仓库；错误记录保留
    pub fn reset(&mut self) {
        let dropped = self.store.len();
        self.state.reset();
        self.store.clear();
        tracing::info!(artifacts = dropped, "session reset");
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.executor.capability_names()
    }

    pub fn system_prompt(&self) -> &str {
        self.planner.system_prompt()
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.planner.token_usage()
    }
}
