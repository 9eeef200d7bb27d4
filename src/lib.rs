//! DataPilot - 对话式数据分析编排引擎
//!
//! 模块划分：
//! - **capabilities**: 能力 trait、注册表、结果信封、执行器与内置能力
//! - **commands**: 命令模板表与确定性命令匹配器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误追踪与熔断、路由、快速通道、会话状态与会话
//! - **llm**: LLM 客户端抽象与 Mock 实现
//! - **memory**: 对话历史
//! - **observability**: 日志初始化
//! - **react**: Planner 与完整路径主循环

pub mod capabilities;
pub mod commands;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;

pub use crate::core::{ConversationSession, SessionBuilder, TurnOutcome};
