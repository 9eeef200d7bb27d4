//! 完整路径主循环
//!
//! Planning -> Router -> Executor -> Router -> Planning ...，直到终止回复或熔断。
//! 模型一次给出的调用批次进入工作队列，每轮只取一个执行；队列空时才再次调用模型。
//! 每次执行后都经 Router 回到 Planning，因此熔断检查发生在任意两次调用之间。

use std::collections::VecDeque;

use tokio::sync::mpsc::UnboundedSender;

use crate::capabilities::{CapabilityExecutor, Envelope};
use crate::core::router::{LastMessage, PlannerMessage, Route, Router};
use crate::core::state::{AgentPhase, PhaseTrail, SessionState};
use crate::core::{AgentError, ErrorTracker, RecoveryAction, RecoveryEngine};
use crate::memory::Message;
use crate::react::events::{preview, send_event, TurnEvent};
use crate::react::planner::{Planner, PlannerDecision};

/// 单轮最大步数（模型调用与能力执行各计一步），防止死循环
pub const MAX_STEPS: usize = 20;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 完整路径执行结果
#[derive(Debug)]
pub struct FullPathResult {
    pub reply: String,
    pub envelopes: Vec<Envelope>,
    pub circuit_open: bool,
}

/// 完整路径所需的协作者（全部借用自会话）
pub struct FullPath<'a> {
    pub planner: &'a Planner,
    pub executor: &'a CapabilityExecutor,
    pub router: &'a Router,
    pub recovery: &'a RecoveryEngine,
    pub max_steps: usize,
    pub event_tx: Option<&'a UnboundedSender<TurnEvent>>,
}

impl<'a> FullPath<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a CapabilityExecutor,
        router: &'a Router,
        recovery: &'a RecoveryEngine,
    ) -> Self {
        Self {
            planner,
            executor,
            router,
            recovery,
            max_steps: MAX_STEPS,
            event_tx: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_event_tx(mut self, tx: Option<&'a UnboundedSender<TurnEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    /// 运行一轮完整路径：写入用户输入，循环至终止回复 / 熔断 / 步数上限
    pub async fn run(
        &self,
        state: &mut SessionState,
        errors: &mut ErrorTracker,
        trail: &mut PhaseTrail,
        user_input: &str,
    ) -> Result<FullPathResult, AgentError> {
        state.push_message(Message::user(user_input));
        trail.advance(AgentPhase::Planning);

        let mut queue: VecDeque<PlannerMessage> = VecDeque::new();
        let mut envelopes = Vec::new();
        let mut step = 0;

        loop {
            if step >= self.max_steps {
                let reply = format!(
                    "Reached the step limit ({}) for this request; stopping here.",
                    self.max_steps
                );
                return Ok(self.finish(state, trail, reply, envelopes));
            }
            step += 1;

            let message = match queue.pop_front() {
                Some(m) => m,
                None => {
                    send_event(self.event_tx, TurnEvent::Planning { step, max_steps: self.max_steps });
                    match self.planner.dispatch(state.history(), self.executor.registry()).await {
                        Ok(PlannerDecision::Reply(text)) => PlannerMessage::Reply(text),
                        Ok(PlannerDecision::Batch(batch)) => {
                            let calls: Vec<_> = batch
                                .iter()
                                .filter_map(PlannerMessage::capability_call)
                                .cloned()
                                .collect();
                            let names: Vec<String> = calls.iter().map(|c| c.capability.clone()).collect();
                            send_event(self.event_tx, TurnEvent::BatchPlanned { capabilities: names.clone() });
                            state.push_message(
                                Message::assistant(format!("Planned calls: {}", names.join(", ")))
                                    .with_payload(serde_json::to_value(&calls).unwrap_or_default()),
                            );
                            queue.extend(batch);
                            match queue.pop_front() {
                                Some(first) => first,
                                None => continue,
                            }
                        }
                        Err(e) => match self.recovery.handle(&e) {
                            RecoveryAction::RetryWithPrompt(prompt) => {
                                tracing::warn!(error = %e, "planner output rejected, retrying");
                                send_event(self.event_tx, TurnEvent::Recovery {
                                    action: "RetryWithPrompt".to_string(),
                                    detail: prompt.clone(),
                                });
                                state.push_message(Message::user(prompt));
                                continue;
                            }
                            RecoveryAction::Abort => {
                                tracing::error!(error = %e, "planner failed, aborting turn");
                                send_event(self.event_tx, TurnEvent::Recovery {
                                    action: "Abort".to_string(),
                                    detail: e.to_string(),
                                });
                                return Err(e);
                            }
                        },
                    }
                }
            };

            match self.router.route(LastMessage::Planner(&message), state.consecutive_errors()) {
                Route::Finish => {
                    let text = match message {
                        PlannerMessage::Reply(text) => text,
                        _ => String::new(),
                    };
                    return Ok(self.finish(state, trail, text, envelopes));
                }
                Route::CircuitOpen { explanation } => {
                    return Ok(self.open_circuit(state, trail, explanation, envelopes));
                }
                Route::Plan => continue,
                Route::Execute(kind) => {
                    let Some(call) = message.capability_call() else {
                        continue;
                    };
                    trail.advance(AgentPhase::executing(kind));
                    send_event(self.event_tx, TurnEvent::CapabilityCall {
                        capability: call.capability.clone(),
                        kind,
                        args: serde_json::Value::Object(call.args.clone()),
                    });

                    let envelope = self.executor.execute(call, state, errors).await;

                    // 错误已在执行器内记录，这里才把信封序列化写入历史
                    let content = serde_json::to_string(&envelope).unwrap_or_else(|_| envelope.message.clone());
                    send_event(self.event_tx, TurnEvent::Observation {
                        capability: envelope.capability.clone(),
                        status: envelope.status,
                        preview: preview(&content, OBSERVATION_PREVIEW_CHARS),
                    });
                    state.push_message(Message::capability(content, envelope.to_value()));
                    envelopes.push(envelope);

                    match self.router.route(LastMessage::Observation, state.consecutive_errors()) {
                        Route::CircuitOpen { explanation } => {
                            if !queue.is_empty() {
                                tracing::warn!(skipped = queue.len(), "circuit open, dropping queued calls");
                            }
                            return Ok(self.open_circuit(state, trail, explanation, envelopes));
                        }
                        _ => trail.advance(AgentPhase::Planning),
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        state: &mut SessionState,
        trail: &mut PhaseTrail,
        reply: String,
        envelopes: Vec<Envelope>,
    ) -> FullPathResult {
        trail.advance(AgentPhase::Terminal);
        state.push_message(Message::assistant(reply.clone()));
        send_event(self.event_tx, TurnEvent::Reply { text: reply.clone() });
        FullPathResult {
            reply,
            envelopes,
            circuit_open: false,
        }
    }

    fn open_circuit(
        &self,
        state: &mut SessionState,
        trail: &mut PhaseTrail,
        explanation: String,
        envelopes: Vec<Envelope>,
    ) -> FullPathResult {
        trail.advance(AgentPhase::CircuitOpen);
        send_event(self.event_tx, TurnEvent::CircuitOpen {
            explanation: explanation.clone(),
        });
        state.push_message(
            Message::assistant(explanation.clone())
                .with_payload(serde_json::json!({ "circuit_open": true })),
        );
        trail.advance(AgentPhase::Terminal);
        FullPathResult {
            reply: explanation,
            envelopes,
            circuit_open: true,
        }
    }
}
