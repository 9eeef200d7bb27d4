//! 会话构建器：统一的会话初始化逻辑
//!
//! 未显式提供的组件按配置补齐：LLM 按 provider 选择，注册表用内置能力，命令表优先读
//! `[commands].table_path`，system prompt 优先读 `[llm].system_prompt_path`。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::capabilities::{register_builtin, ArtifactStore, CapabilityExecutor, CapabilityRegistry};
use crate::commands::{CommandMatcher, CommandTable};
use crate::config::AppConfig;
use crate::core::hybrid::HybridExecutor;
use crate::core::router::Router;
use crate::core::session::ConversationSession;
use crate::core::state::SessionState;
use crate::core::{AgentError, ErrorTracker, RecoveryEngine};
use crate::llm::{LlmClient, MockLlmClient};
use crate::react::events::TurnEvent;
use crate::react::planner::{Planner, DEFAULT_SYSTEM_PROMPT};

pub struct SessionBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<CapabilityRegistry>,
    command_table: Option<CommandTable>,
    system_prompt: Option<String>,
    event_tx: Option<UnboundedSender<TurnEvent>>,
    store: Arc<ArtifactStore>,
}

impl SessionBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: None,
            command_table: None,
            system_prompt: None,
            event_tx: None,
            store: Arc::new(ArtifactStore::new()),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换内置能力（测试常用）
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_command_table(mut self, table: CommandTable) -> Self {
        self.command_table = Some(table);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<TurnEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn build_llm(&self) -> Result<Arc<dyn LlmClient>, AgentError> {
        if let Some(llm) = &self.llm {
            return Ok(llm.clone());
        }
        match self.config.llm.provider.as_str() {
            "mock" => Ok(Arc::new(MockLlmClient::new())),
            other => Err(AgentError::ConfigError(format!(
                "unsupported llm provider '{}' (bundled: mock)",
                other
            ))),
        }
    }

    fn build_command_table(&self) -> Result<CommandTable, AgentError> {
        if let Some(table) = &self.command_table {
            table.validate()?;
            return Ok(table.clone());
        }
        match &self.config.commands.table_path {
            Some(path) => {
                let table = CommandTable::load(path)?;
                tracing::info!(path = %path.display(), "command table loaded");
                Ok(table)
            }
            None => Ok(CommandTable::builtin()),
        }
    }

    fn base_prompt(&self) -> String {
        if let Some(prompt) = &self.system_prompt {
            return prompt.clone();
        }
        let Some(path) = &self.config.llm.system_prompt_path else {
            return DEFAULT_SYSTEM_PROMPT.to_string();
        };
        match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "system prompt unreadable, using default");
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }

    pub fn build(self) -> Result<ConversationSession, AgentError> {
        let llm = self.build_llm()?;
        let table = self.build_command_table()?;
        let base_prompt = self.base_prompt();

        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                let mut registry = CapabilityRegistry::new();
                register_builtin(&mut registry, self.store.clone(), self.config.capabilities.default_rows);
                registry
            }
        };

        let session = &self.config.session;
        let planner = Planner::new(llm, base_prompt, &registry);
        let recovery = RecoveryEngine::new().with_capabilities(registry.names());
        let matcher = CommandMatcher::new(table.clone())?;

        tracing::info!(
            capabilities = ?registry.names(),
            threshold = session.error_threshold,
            max_steps = session.max_steps,
            "session ready"
        );

        Ok(ConversationSession {
            state: SessionState::new(self.config.app.max_history_messages)
                .with_trace_capacity(session.trace_capacity),
            errors: ErrorTracker::new(session.error_threshold, session.error_history_capacity),
            executor: CapabilityExecutor::new(registry)
                .with_preview_chars(self.config.capabilities.preview_chars),
            planner,
            router: Router::new(session.error_threshold),
            recovery,
            matcher,
            hybrid: HybridExecutor::new(table),
            max_steps: session.max_steps,
            event_tx: self.event_tx,
            store: self.store,
        })
    }
}

/// 便捷函数：加载配置（失败时用默认值）并创建构建器
pub fn create_session_builder(config_path: Option<PathBuf>) -> SessionBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    SessionBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_build_registers_builtin_capabilities() {
        let session = SessionBuilder::new(AppConfig::default()).build().unwrap();
        assert_eq!(
            session.capability_names(),
            vec!["compute_statistics", "generate_data", "generate_report", "render_chart"]
        );
        assert!(session.system_prompt().contains("render_chart"));
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut config = AppConfig::default();
        config.llm.provider = "openai".into();
        assert!(matches!(
            SessionBuilder::new(config).build(),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[test]
    fn test_command_table_from_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.toml");
        std::fs::write(
            &path,
            "version = 1\nvariants = [\"brief\"]\n\n[[templates]]\npattern = \"<variant> please\"\n",
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.commands.table_path = Some(path);

        let session = SessionBuilder::new(config).build().unwrap();
        assert!(session.matcher.match_input("brief please").is_some());
        assert!(session.matcher.match_input("brief summary").is_none());
    }
}
