//! 会话集成测试：完整路径、快速通道与熔断

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use datapilot::capabilities::{
        ArtifactHandle, Capability, CapabilityKind, CapabilityOutput, CapabilityRegistry,
    };
    use datapilot::config::AppConfig;
    use datapilot::core::{
        AgentError, AgentPhase, ConversationSession, ErrorCategory, ExecutionPath, FallbackReason,
        SessionBuilder,
    };
    use datapilot::llm::MockLlmClient;
    use datapilot::react::TurnEvent;
    use serde_json::{json, Map, Value};

    /// 数据类测试能力：按 fail 决定成败，并统计调用次数
    struct ScriptedData {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for ScriptedData {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Data
        }

        fn description(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, _args: Map<String, Value>) -> anyhow::Result<CapabilityOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("{} exploded", self.name);
            }
            Ok(CapabilityOutput::success("ok", json!({})).with_artifact(ArtifactHandle::generate("scripted")))
        }
    }

    fn register_data(registry: &mut CapabilityRegistry, name: &'static str, fail: bool) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(ScriptedData {
            name,
            fail,
            calls: calls.clone(),
        });
        calls
    }

    fn builtin_session(llm: Arc<MockLlmClient>) -> ConversationSession {
        SessionBuilder::new(AppConfig::default())
            .with_llm(llm)
            .build()
            .unwrap()
    }

    /// 用演示规划跑一遍：生成数据 -> 画图 -> 统计 -> 报告
    async fn analysed_session() -> (ConversationSession, Arc<MockLlmClient>) {
        let llm = Arc::new(MockLlmClient::new());
        let mut session = builtin_session(llm.clone());
        let outcome = session.handle_turn("plot some data and summarize it").await.unwrap();
        assert_eq!(outcome.path, ExecutionPath::Full);
        assert!(!outcome.circuit_open);
        assert_eq!(outcome.envelopes.len(), 4);
        assert!(outcome.envelopes.iter().all(|e| e.is_success()));
        (session, llm)
    }

    #[tokio::test]
    async fn test_full_path_runs_batch_in_order() {
        let (session, llm) = analysed_session().await;
        assert_eq!(llm.call_count(), 2);

        let snapshot = session.snapshot();
        assert!(snapshot.latest_artifact.is_some());
        let params = snapshot.parameters.unwrap();
        assert_eq!(params.capability, "render_chart");
        assert_eq!(params.params["colormap"], "viridis");
        assert_eq!(params.params["alpha"], 0.7);
        assert_eq!(snapshot.cached_variants, vec!["brief", "detailed", "technical"]);
        assert_eq!(snapshot.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_full_path_phase_trail() {
        let llm = Arc::new(MockLlmClient::new());
        let mut session = builtin_session(llm);
        let outcome = session.handle_turn("analyse").await.unwrap();

        use AgentPhase::*;
        assert_eq!(
            outcome.phases,
            vec![
                AwaitingInput,
                Planning,
                ExecutingData,
                Planning,
                ExecutingVisualization,
                Planning,
                ExecutingStatistics,
                Planning,
                ExecutingReport,
                Planning,
                Terminal,
            ]
        );
        for pair in outcome.phases.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[tokio::test]
    async fn test_parameter_update_without_artifact_falls_back() {
        let llm = Arc::new(MockLlmClient::scripted(["There is no chart yet, shall I make one?"]));
        let mut session = builtin_session(llm.clone());

        let outcome = session.handle_turn("colormap plasma").await.unwrap();

        assert_eq!(outcome.path, ExecutionPath::Full);
        assert_eq!(outcome.fallback, Some(FallbackReason::NoParameterSnapshot));
        assert_eq!(outcome.reply, "There is no chart yet, shall I make one?");
        assert_eq!(llm.call_count(), 1);
        assert!(session.snapshot().parameters.is_none());
    }

    #[tokio::test]
    async fn test_parameter_update_rerenders_without_planner() {
        let (mut session, llm) = analysed_session().await;
        let calls_before = llm.call_count();
        let artifact_before = session.snapshot().latest_artifact;

        let outcome = session.handle_turn("colormap plasma").await.unwrap();

        assert_eq!(outcome.path, ExecutionPath::Hybrid);
        assert_eq!(outcome.phases, vec![AgentPhase::AwaitingInput, AgentPhase::Terminal]);
        assert_eq!(llm.call_count(), calls_before);
        assert_eq!(outcome.envelopes.len(), 1);
        assert!(outcome.envelopes[0].is_success());

        let snapshot = session.snapshot();
        let params = snapshot.parameters.unwrap();
        assert_eq!(params.params["colormap"], "plasma");
        assert_eq!(params.params["alpha"], 0.7);
        assert_ne!(snapshot.latest_artifact, artifact_before);

        let again = session.handle_turn("set alpha to 0.3").await.unwrap();
        assert_eq!(again.path, ExecutionPath::Hybrid);
        let params = session.snapshot().parameters.unwrap();
        assert_eq!(params.params["colormap"], "plasma");
        assert_eq!(params.params["alpha"], 0.3);
    }

    #[tokio::test]
    async fn test_out_of_range_value_is_not_a_command() {
        let llm = Arc::new(MockLlmClient::scripted(["alpha must be between 0 and 1"]));
        let mut session = builtin_session(llm.clone());

        let outcome = session.handle_turn("alpha 7").await.unwrap();

        assert_eq!(outcome.path, ExecutionPath::Full);
        assert_eq!(outcome.fallback, None);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_report_retrieval_is_idempotent() {
        let (mut session, llm) = analysed_session().await;
        let calls_before = llm.call_count();
        let cached = session.state().analysis_output("brief").unwrap().to_string();
        let before = session.snapshot();

        for _ in 0..3 {
            let outcome = session.handle_turn("brief summary").await.unwrap();
            assert_eq!(outcome.path, ExecutionPath::Hybrid);
            assert_eq!(outcome.reply, cached);
            assert!(outcome.envelopes.is_empty());
        }

        let after = session.snapshot();
        assert_eq!(llm.call_count(), calls_before);
        assert_eq!(after.cached_variants, before.cached_variants);
        assert_eq!(after.latest_artifact, before.latest_artifact);
        assert_eq!(after.consecutive_errors, 0);
        assert_eq!(after.trace_len, before.trace_len);
    }

    #[tokio::test]
    async fn test_missing_report_recomputes_on_full_path() {
        let llm = Arc::new(MockLlmClient::new());
        let mut session = builtin_session(llm);

        let outcome = session.handle_turn("technical report").await.unwrap();

        assert_eq!(outcome.path, ExecutionPath::Full);
        assert!(matches!(
            outcome.fallback,
            Some(FallbackReason::ReportNotCached { ref variant }) if variant == "technical"
        ));
        assert!(session.state().analysis_output("technical").is_some());

        let served = session.handle_turn("technical report").await.unwrap();
        assert_eq!(served.path, ExecutionPath::Hybrid);
    }

    #[tokio::test]
    async fn test_three_failures_open_circuit_before_fourth_call() {
        let mut registry = CapabilityRegistry::new();
        let first = register_data(&mut registry, "load_a", true);
        let second = register_data(&mut registry, "load_b", true);
        let third = register_data(&mut registry, "load_c", true);
        let fourth = register_data(&mut registry, "load_d", false);

        let llm = Arc::new(MockLlmClient::scripted([
            r#"[{"capability": "load_a"}, {"capability": "load_b"}, {"capability": "load_c"}, {"capability": "load_d"}]"#,
        ]));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut session = SessionBuilder::new(AppConfig::default())
            .with_llm(llm.clone())
            .with_registry(registry)
            .with_event_tx(tx)
            .build()
            .unwrap();

        let outcome = session.handle_turn("load everything").await.unwrap();

        assert!(outcome.circuit_open);
        assert!(outcome.reply.contains("/errors"));
        assert_eq!(outcome.envelopes.len(), 3);
        for calls in [&first, &second, &third] {
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
        assert_eq!(fourth.load(Ordering::SeqCst), 0);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(
            &outcome.phases[outcome.phases.len() - 3..],
            &[AgentPhase::ExecutingData, AgentPhase::CircuitOpen, AgentPhase::Terminal]
        );

        let recent = session.recent_errors(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].capability, "load_c");
        assert!(recent.iter().all(|r| r.category == ErrorCategory::ExecutionFailed));
        let detail = session.error_detail(recent[2].id).unwrap();
        assert!(detail.contains("load_a exploded"));

        let mut opened = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, TurnEvent::CircuitOpen { .. }) {
                opened += 1;
            }
        }
        assert_eq!(opened, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_count() {
        let mut registry = CapabilityRegistry::new();
        register_data(&mut registry, "bad", true);
        let good = register_data(&mut registry, "good", false);

        let llm = Arc::new(MockLlmClient::scripted([
            r#"[{"capability": "bad"}, {"capability": "bad"}, {"capability": "good"}, {"capability": "bad"}, {"capability": "bad"}]"#,
            "Finished with some failures.",
            "Nothing to do.",
        ]));
        let mut session = SessionBuilder::new(AppConfig::default())
            .with_llm(llm)
            .with_registry(registry)
            .build()
            .unwrap();

        let outcome = session.handle_turn("try it").await.unwrap();
        assert!(!outcome.circuit_open);
        assert_eq!(outcome.envelopes.len(), 5);
        assert_eq!(good.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.reply, "Finished with some failures.");
        assert_eq!(session.snapshot().consecutive_errors, 2);
        assert_eq!(session.errors().len(), 4);

        session.handle_turn("anything else?").await.unwrap();
        assert_eq!(session.snapshot().consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_unknown_capability_retries_with_prompt() {
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"capability": "teleport", "args": {}}"#,
            "I can only work with datasets and charts.",
        ]));
        let mut session = builtin_session(llm.clone());

        let outcome = session.handle_turn("teleport me").await.unwrap();

        assert_eq!(outcome.reply, "I can only work with datasets and charts.");
        assert_eq!(llm.call_count(), 2);
        assert!(outcome.envelopes.is_empty());
        assert!(session
            .state()
            .history()
            .iter()
            .any(|m| m.content.contains("generate_data")));
    }

    #[tokio::test]
    async fn test_llm_failure_aborts_turn() {
        let llm = Arc::new(MockLlmClient::scripted(Vec::<String>::new()));
        llm.push_failure("connection refused");
        let mut session = builtin_session(llm);

        let result = session.handle_turn("hello").await;
        assert!(matches!(result, Err(AgentError::LlmError(ref m)) if m == "connection refused"));
    }

    #[tokio::test]
    async fn test_reset_clears_state_but_keeps_errors() {
        let mut registry = CapabilityRegistry::new();
        register_data(&mut registry, "bad", true);
        let llm = Arc::new(MockLlmClient::scripted([r#"{"capability": "bad"}"#, "It failed."]));
        let mut session = SessionBuilder::new(AppConfig::default())
            .with_llm(llm)
            .with_registry(registry)
            .build()
            .unwrap();

        session.handle_turn("go").await.unwrap();
        assert_eq!(session.errors().len(), 1);

        session.reset();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.history_len, 0);
        assert!(snapshot.latest_artifact.is_none());
        assert_eq!(snapshot.trace_len, 0);
        assert_eq!(session.recent_errors(5).len(), 1);
    }

    #[tokio::test]
    async fn test_reset_empties_artifact_store() {
        let (mut session, _llm) = analysed_session().await;
        let handle = session.snapshot().latest_artifact.unwrap();
        assert!(!session.artifacts().is_empty());
        assert!(session.artifacts().get(&handle).is_some());

        session.reset();
        assert!(session.artifacts().is_empty());
        assert!(session.artifacts().get(&handle).is_none());
    }

    #[tokio::test]
    async fn test_repeated_parameter_update_replaces_only_that_key() {
        let (mut session, _llm) = analysed_session().await;
        let before = session.snapshot().parameters.unwrap().params;

        let outcome = session.handle_turn("colormap plasma").await.unwrap();
        assert_eq!(outcome.path, ExecutionPath::Hybrid);
        let outcome = session.handle_turn("colormap inferno").await.unwrap();
        assert_eq!(outcome.path, ExecutionPath::Hybrid);

        let mut expected = before.clone();
        expected.insert("colormap".into(), json!("inferno"));
        let after = session.snapshot().parameters.unwrap();
        assert_eq!(after.capability, "render_chart");
        assert_eq!(after.params, expected);
        assert_eq!(after.params.len(), before.len());
    }
}
