//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::generate：
//! 传入 system 指令与对话历史，可选绑定工具 schema，返回一条 Agent 回复（文本 + 工具调用）。
//! 不绑定工具（tools = None）即为 Verifier 评审与历史摘要使用的「非绑定模式」。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolCallRequest};

/// 模型调用失败（网络、HTTP 状态、响应格式）
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no response available: {0}")]
    Unavailable(String),
}

/// 一次模型请求：system 指令 + 有序消息
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
        }
    }
}

/// 绑定给模型的工具描述（function calling）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 模型回复：文本内容与按顺序排列的工具调用
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AgentReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn into_message(self) -> Message {
        Message::agent_with_calls(self.content, self.tool_calls)
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        request: &ChatRequest,
        tools: Option<&[ToolSpec]>,
    ) -> Result<AgentReply, LlmError>;

    /// 累计 token 使用：(prompt, completion, total)；默认不统计
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
