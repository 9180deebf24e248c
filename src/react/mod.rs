//! 认知层：Agent 步骤的 prompt 组装、答案评审、过程事件

pub mod events;
pub mod planner;
pub mod verifier;

pub use events::{preview, TurnEvent};
pub use planner::{Planner, DEFAULT_BASE_PROMPT};
pub use verifier::{parse_verdict, Verdict, Verifier};
