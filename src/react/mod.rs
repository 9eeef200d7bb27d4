//! 认知层：Planner、完整路径主循环、过程事件

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::TurnEvent;
pub use loop_::{FullPath, FullPathResult};
pub use planner::{parse_llm_output, Planner, PlannerDecision, PlannerOutput};
