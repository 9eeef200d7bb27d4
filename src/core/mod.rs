//! 核心编排层：错误与恢复、错误追踪、路由、快速通道、会话状态与会话

pub mod builder;
pub mod error;
pub mod error_tracker;
pub mod hybrid;
pub mod recovery;
pub mod router;
pub mod session;
pub mod state;

pub use builder::{create_session_builder, SessionBuilder};
pub use error::{AgentError, ErrorCategory, RecoveryAction};
pub use error_tracker::{ErrorRecord, ErrorTracker};
pub use hybrid::{FallbackReason, HybridExecutor, HybridOutcome};
pub use recovery::RecoveryEngine;
pub use router::{LastMessage, PlannerMessage, Route, Router};
pub use session::{ConversationSession, ExecutionPath, TurnOutcome};
pub use state::{AgentPhase, ParameterSnapshot, PhaseTrail, SessionSnapshot, SessionState};
