//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DATAPILOT__*` 覆盖（双下划线表示嵌套，如 `DATAPILOT__SESSION__ERROR_THRESHOLD=5`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::error_tracker::{DEFAULT_ERROR_THRESHOLD, DEFAULT_HISTORY_CAPACITY};
use crate::core::state::DEFAULT_TRACE_CAPACITY;
use crate::react::loop_::MAX_STEPS;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub session: SessionSection,
    pub llm: LlmSection,
    pub commands: CommandsSection,
    pub capabilities: CapabilitiesSection,
}

/// [app] 段：应用名、历史上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话历史保留的最大消息数（超出时丢弃最旧的非 system 消息）
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_history_messages: default_max_history_messages(),
        }
    }
}

fn default_max_history_messages() -> usize {
    200
}

/// [session] 段：熔断阈值、错误记录与执行轨迹容量、单轮步数上限
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_error_history_capacity")]
    pub error_history_capacity: usize,
    #[serde(default = "default_trace_capacity")]
    pub trace_capacity: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            error_history_capacity: default_error_history_capacity(),
            trace_capacity: default_trace_capacity(),
            max_steps: default_max_steps(),
        }
    }
}

fn default_error_threshold() -> u32 {
    DEFAULT_ERROR_THRESHOLD
}

fn default_error_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_trace_capacity() -> usize {
    DEFAULT_TRACE_CAPACITY
}

fn default_max_steps() -> usize {
    MAX_STEPS
}

/// [llm] 段：后端与 system prompt 来源
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 目前只内置 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 基础 system prompt 文件；未设置或读取失败时用内置提示
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            system_prompt_path: None,
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

/// [commands] 段：命令模板表
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CommandsSection {
    /// TOML 模板表路径；未设置时使用内置表
    pub table_path: Option<PathBuf>,
}

/// [capabilities] 段：内置能力与日志预览
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitiesSection {
    /// 审计日志中参数预览的最大字符数
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    /// generate_data 默认行数
    #[serde(default = "default_rows")]
    pub default_rows: usize,
}

impl Default for CapabilitiesSection {
    fn default() -> Self {
        Self {
            preview_chars: default_preview_chars(),
            default_rows: default_rows(),
        }
    }
}

fn default_preview_chars() -> usize {
    200
}

fn default_rows() -> usize {
    100
}

/// 从 config 目录加载配置，环境变量 DATAPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DATAPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DATAPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
