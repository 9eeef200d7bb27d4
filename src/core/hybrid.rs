//! 快速通道执行器
//!
//! 只在命令匹配器命中时调用。参数更新：合并进已有快照后同步重跑同一个可视化能力；
//! 报告读取：直接返回缓存文本，不改动任何状态。缺少前置条件时返回 FallbackRequired，
//! 由会话转入完整路径。

use std::fmt;

use serde_json::Value;

use crate::capabilities::{CapabilityCall, CapabilityExecutor, CapabilityKind, Envelope};
use crate::commands::{CommandTable, SimpleCommand};
use crate::core::state::{ParameterSnapshot, SessionState};
use crate::core::ErrorTracker;

/// 无法走快速通道的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// 还没有任何可视化参数快照
    NoParameterSnapshot,
    /// 参数不适用于快照所属的能力
    ParameterNotApplicable { parameter: String, capability: String },
    /// 快照所属能力已不可用（未注册或不是可视化能力）
    CapabilityUnavailable { capability: String },
    /// 请求的报告变体不在缓存中
    ReportNotCached { variant: String },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoParameterSnapshot => write!(f, "no chart parameters to update yet"),
            FallbackReason::ParameterNotApplicable { parameter, capability } => {
                write!(f, "parameter '{}' does not apply to {}", parameter, capability)
            }
            FallbackReason::CapabilityUnavailable { capability } => {
                write!(f, "capability '{}' is not available for re-rendering", capability)
            }
            FallbackReason::ReportNotCached { variant } => {
                write!(f, "no cached '{}' report", variant)
            }
        }
    }
}

/// 快速通道结果
#[derive(Debug, Clone)]
pub enum HybridOutcome {
    /// 参数已更新并重新渲染
    Updated {
        envelope: Envelope,
        snapshot: ParameterSnapshot,
    },
    /// 缓存命中
    Retrieved { variant: String, text: String },
    /// 重跑失败，错误已记录；快照保持原值
    Failed { envelope: Envelope },
    FallbackRequired(FallbackReason),
}

pub struct HybridExecutor {
    table: CommandTable,
}

impl HybridExecutor {
    pub fn new(table: CommandTable) -> Self {
        Self { table }
    }

    pub async fn execute(
        &self,
        command: &SimpleCommand,
        executor: &CapabilityExecutor,
        state: &mut SessionState,
        errors: &mut ErrorTracker,
    ) -> HybridOutcome {
        match command {
            SimpleCommand::UpdateParameter { name, value } => {
                self.update(name, value, executor, state, errors).await
            }
            SimpleCommand::RetrieveReport { variant } => self.retrieve(variant, state),
        }
    }

    /// 读取缓存变体；只读，不触发任何重算
    pub fn retrieve(&self, variant: &str, state: &SessionState) -> HybridOutcome {
        match state.analysis_output(variant) {
            Some(text) => HybridOutcome::Retrieved {
                variant: variant.to_string(),
                text: text.to_string(),
            },
            None => HybridOutcome::FallbackRequired(FallbackReason::ReportNotCached {
                variant: variant.to_string(),
            }),
        }
    }

    async fn update(
        &self,
        name: &str,
        value: &Value,
        executor: &CapabilityExecutor,
        state: &mut SessionState,
        errors: &mut ErrorTracker,
    ) -> HybridOutcome {
        let Some(snapshot) = state.parameter_snapshot() else {
            return HybridOutcome::FallbackRequired(FallbackReason::NoParameterSnapshot);
        };

        let applicable = self
            .table
            .parameter(name)
            .map_or(false, |spec| spec.applies_to(&snapshot.capability));
        if !applicable {
            return HybridOutcome::FallbackRequired(FallbackReason::ParameterNotApplicable {
                parameter: name.to_string(),
                capability: snapshot.capability.clone(),
            });
        }

        if executor.kind_of(&snapshot.capability) != Some(CapabilityKind::Visualization) {
            return HybridOutcome::FallbackRequired(FallbackReason::CapabilityUnavailable {
                capability: snapshot.capability.clone(),
            });
        }

        let merged = snapshot.with_value(name, value.clone());
        tracing::info!(
            capability = %merged.capability,
            parameter = name,
            value = %value,
            "hybrid parameter update"
        );

        let call = CapabilityCall::new(merged.capability.clone(), merged.params.clone());
        let envelope = executor.execute(&call, state, errors).await;
        if !envelope.is_success() {
            return HybridOutcome::Failed { envelope };
        }

        let snapshot = state.parameter_snapshot().cloned().unwrap_or(merged);
        HybridOutcome::Updated { envelope, snapshot }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Map};

    use super::*;
    use crate::capabilities::{
        ArtifactHandle, Capability, CapabilityOutput, CapabilityRegistry,
    };

    struct Chart {
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Capability for Chart {
        fn name(&self) -> &str {
            "render_chart"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Visualization
        }

        fn description(&self) -> &str {
            "chart"
        }

        fn consumes_artifact(&self) -> bool {
            true
        }

        async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<CapabilityOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("renderer crashed");
            }
            Ok(CapabilityOutput::success("rendered", json!({}))
                .with_artifact(ArtifactHandle::generate("chart"))
                .with_parameters(args))
        }
    }

    struct Fixture {
        hybrid: HybridExecutor,
        executor: CapabilityExecutor,
        state: SessionState,
        errors: ErrorTracker,
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let mut registry = CapabilityRegistry::new();
        registry.register(Chart {
            calls: calls.clone(),
            fail: fail.clone(),
        });
        Fixture {
            hybrid: HybridExecutor::new(CommandTable::builtin()),
            executor: CapabilityExecutor::new(registry),
            state: SessionState::new(50),
            errors: ErrorTracker::default(),
            calls,
            fail,
        }
    }

    fn seed_snapshot(state: &mut SessionState) {
        let params = json!({"colormap": "viridis", "alpha": 0.7, "artifact": "dataset-1"});
        state.set_latest_artifact(ArtifactHandle::from("chart-0"));
        state.set_parameter_snapshot(ParameterSnapshot::new(
            "render_chart",
            params.as_object().cloned().unwrap(),
        ));
    }

    fn update(name: &str, value: Value) -> SimpleCommand {
        SimpleCommand::UpdateParameter {
            name: name.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_update_without_snapshot_falls_back() {
        let mut f = fixture();
        let out = f
            .hybrid
            .execute(&update("colormap", json!("plasma")), &f.executor, &mut f.state, &mut f.errors)
            .await;
        assert!(matches!(
            out,
            HybridOutcome::FallbackRequired(FallbackReason::NoParameterSnapshot)
        ));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_overwrites_single_key_and_rerenders() {
        let mut f = fixture();
        seed_snapshot(&mut f.state);

        let out = f
            .hybrid
            .execute(&update("colormap", json!("plasma")), &f.executor, &mut f.state, &mut f.errors)
            .await;

        match out {
            HybridOutcome::Updated { envelope, snapshot } => {
                assert!(envelope.is_success());
                assert_eq!(snapshot.params["colormap"], "plasma");
                assert_eq!(snapshot.params["alpha"], 0.7);
            }
            other => panic!("Expected Updated, got {:?}", other),
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_ne!(f.state.latest_artifact(), Some(&ArtifactHandle::from("chart-0")));
        assert_eq!(f.state.parameter_snapshot().unwrap().params["colormap"], "plasma");
    }

    #[tokio::test]
    async fn test_failed_rerender_keeps_snapshot_and_records_error() {
        let mut f = fixture();
        seed_snapshot(&mut f.state);
        f.fail.store(true, Ordering::SeqCst);

        let out = f
            .hybrid
            .execute(&update("alpha", json!(0.2)), &f.executor, &mut f.state, &mut f.errors)
            .await;

        assert!(matches!(out, HybridOutcome::Failed { .. }));
        assert_eq!(f.state.parameter_snapshot().unwrap().params["alpha"], 0.7);
        assert_eq!(f.errors.len(), 1);
        assert_eq!(f.state.consecutive_errors(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_snapshot_capability_falls_back() {
        let mut f = fixture();
        f.state.set_parameter_snapshot(ParameterSnapshot::new("old_plotter", Map::new()));

        let out = f
            .hybrid
            .execute(&update("grid", json!(true)), &f.executor, &mut f.state, &mut f.errors)
            .await;

        assert!(matches!(
            out,
            HybridOutcome::FallbackRequired(FallbackReason::CapabilityUnavailable { .. })
        ));
    }

    #[test]
    fn test_retrieve_is_read_only() {
        let f = fixture();
        let mut state = f.state.clone();
        let mut cache = BTreeMap::new();
        cache.insert("brief".to_string(), "Mean 4.2, sd 1.1".to_string());
        state.replace_analysis_outputs(cache);
        let before = state.snapshot();

        for _ in 0..3 {
            match f.hybrid.retrieve("brief", &state) {
                HybridOutcome::Retrieved { text, .. } => assert_eq!(text, "Mean 4.2, sd 1.1"),
                other => panic!("Expected Retrieved, got {:?}", other),
            }
        }
        assert_eq!(state.snapshot().cached_variants, before.cached_variants);
        assert_eq!(state.consecutive_errors(), 0);

        assert!(matches!(
            f.hybrid.retrieve("technical", &state),
            HybridOutcome::FallbackRequired(FallbackReason::ReportNotCached { .. })
        ));
    }
}
