//! 编排核心的错误类型
//!
//! 可恢复的问题（工具失败、无人确认、摘要失败、校验耗尽）都在核心内部转成对话文本，
//! 不会出现在这里；AgentError 只表示中止整轮的失败，调用方需与正常回答区分展示。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::StoreError;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Agent 步骤或 Verifier 评审的模型调用失败：本轮中止，会话状态保持轮前原样
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 是否为模型调用失败（前端据此给出「重试」提示）
    pub fn is_llm(&self) -> bool {
        matches!(self, Self::Llm(_))
    }
}
