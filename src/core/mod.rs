//! 核心编排层：错误、会话状态、审批、单轮状态机与构建器

pub mod approval;
pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use approval::{
    confirmation_question, ApprovalDecision, ApprovalGate, ApprovalReview, NonInteractiveOperator,
    OperatorChannel, ScriptedOperator,
};
pub use builder::{create_agent_builder, create_llm_from_config, AgentBuilder};
pub use error::AgentError;
pub use orchestrator::{Orchestrator, TurnEnding, TurnOutcome, DEFAULT_MAX_STEPS};
pub use state::{dedup_todos, SessionPatch, SessionState, TodoItem, TurnPhase, WorkContext};
