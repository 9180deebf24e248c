//! Mock LLM 客户端（无需 API）
//!
//! - MockLlmClient：回显最后一条用户输入，不发起工具调用，便于离线跑通对话。
//! - ScriptedLlm：按脚本依次返回预设回复或错误，并记录每次请求，供测试驱动状态机。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{AgentReply, ChatRequest, LlmClient, LlmError, ToolSpec};
use crate::memory::Message;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(
        &self,
        request: &ChatRequest,
        _tools: Option<&[ToolSpec]>,
    ) -> Result<AgentReply, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(Message::content)
            .unwrap_or("(no input)");
        Ok(AgentReply::text(format!("Echo from Mock: {}", last_user)))
    }
}

/// 一次被记录的调用
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub request: ChatRequest,
    /// 调用时是否绑定了工具 schema
    pub tools_bound: bool,
}

/// 脚本化客户端：队列耗尽后返回 fallback（若设置）否则 Unavailable
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<AgentReply, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    fallback: Option<AgentReply>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = AgentReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// 脚本耗尽后一直返回该回复
    pub fn with_fallback(mut self, reply: AgentReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn push_reply(&self, reply: AgentReply) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(reply));
        }
    }

    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(
        &self,
        request: &ChatRequest,
        tools: Option<&[ToolSpec]>,
    ) -> Result<AgentReply, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                request: request.clone(),
                tools_bound: tools.is_some(),
            });
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Unavailable("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let request = ChatRequest::new(
            "sys",
            vec![Message::user("first"), Message::agent("a"), Message::user("second")],
        );
        let reply = MockLlmClient.generate(&request, None).await.unwrap();
        assert_eq!(reply.content, "Echo from Mock: second");
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_order_and_exhaustion() {
        let llm = ScriptedLlm::new([AgentReply::text("one")]);
        llm.push_error(LlmError::Request("down".into()));
        let request = ChatRequest::default();

        assert_eq!(llm.generate(&request, Some(&[])).await.unwrap().content, "one");
        assert!(matches!(
            llm.generate(&request, None).await,
            Err(LlmError::Request(_))
        ));
        assert!(matches!(
            llm.generate(&request, None).await,
            Err(LlmError::Unavailable(_))
        ));

        let calls = llm.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].tools_bound);
        assert!(!calls[1].tools_bound);
    }

    #[tokio::test]
    async fn test_scripted_fallback() {
        let llm = ScriptedLlm::new([]).with_fallback(AgentReply::text("again"));
        let request = ChatRequest::default();
        for _ in 0..3 {
            assert_eq!(llm.generate(&request, None).await.unwrap().content, "again");
        }
    }
}
