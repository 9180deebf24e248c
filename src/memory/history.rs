//! 历史压缩：边界安全的摘要
//!
//! 历史达到 `max_turns` 条时，把较早的连续前缀交给 LLM 摘要，替换为一条 Summary，
//! 保留最近约 `keep_turns` 条。切分点不会落在「带工具调用的 Agent 消息」与其 ToolResult 之间。
//! 摘要调用失败只跳过本次压缩，历史原样保留。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::llm::{ChatRequest, LlmClient};
use crate::memory::{render_transcript, Message};

const SUMMARY_SYSTEM_PROMPT: &str = "You condense past conversation so it can be referenced later. \
Use the full conversation as context and summarize only the segment marked for summarization. \
Focus on the main topics, the decisions made, and the open issues or unfinished tasks. \
Keep file paths, names and numbers exactly as they appear.";

/// 一次压缩的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compaction {
    /// 未达阈值或前缀为空
    Unchanged,
    /// 前缀 `removed` 条被替换为一条摘要，后面保留 `kept` 条
    Summarized { removed: usize, kept: usize },
    /// 摘要调用失败，历史保持不变
    Skipped(String),
}

/// 计算切分点：返回值之前的消息进入摘要
///
/// 从 `len - keep_turns` 出发，跨过 ToolResult 向前回退，使工具结果与发起调用的
/// Agent 消息留在同一侧；若前缀最后一条是带工具调用的 Agent 消息，再回退一步。
pub fn split_point(history: &[Message], keep_turns: usize) -> usize {
    let len = history.len();
    let mut split = len.saturating_sub(keep_turns.max(1));
    while split > 0 && split < len && history[split].is_tool_result() {
        split -= 1;
    }
    if split > 0 && history[split - 1].has_tool_calls() {
        split -= 1;
    }
    split
}

pub struct HistoryManager {
    llm: Arc<dyn LlmClient>,
    max_turns: usize,
    keep_turns: usize,
}

impl HistoryManager {
    /// `max_turns == 0` 关闭摘要；`keep_turns` 至少为 1
    ///
    /// 压缩发生在 Agent 消息刚写入之后，最新一条可能是尚未执行的工具调用。
    /// `keep_turns == 0` 会把它连同前缀一起摘要掉，之后的 ToolResult 就失去了对应的调用，
    /// 因此按 1 处理（配置加载时直接拒绝 0）。
    pub fn new(llm: Arc<dyn LlmClient>, max_turns: usize, keep_turns: usize) -> Self {
        Self {
            llm,
            max_turns,
            keep_turns: keep_turns.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn keep_turns(&self) -> usize {
        self.keep_turns
    }

    /// 是否达到压缩阈值
    pub fn needs_compaction(&self, history: &[Message]) -> bool {
        self.max_turns > 0 && history.len() >= self.max_turns
    }

    /// 必要时原地压缩历史
    pub async fn maybe_summarize(&self, history: &mut Vec<Message>) -> Compaction {
        if !self.needs_compaction(history) {
            return Compaction::Unchanged;
        }
        let split = split_point(history, self.keep_turns);
        if split == 0 {
            debug!(len = history.len(), "summary prefix empty, nothing to compact");
            return Compaction::Unchanged;
        }

        let request = summary_request(history, split);
        let summary = match self.llm.generate(&request, None).await {
            Ok(reply) if !reply.content.trim().is_empty() => reply.content,
            Ok(_) => {
                warn!("summarization returned empty content, keeping full history");
                return Compaction::Skipped("empty summary".to_string());
            }
            Err(e) => {
                warn!(error = %e, "summarization failed, keeping full history");
                return Compaction::Skipped(e.to_string());
            }
        };

        let kept = history.len() - split;
        let suffix = history.split_off(split);
        history.clear();
        history.push(Message::summary(summary.trim()));
        history.extend(suffix);
        info!(removed = split, kept, "conversation history summarized");
        Compaction::Summarized {
            removed: split,
            kept,
        }
    }
}

/// 摘要请求：完整历史作上下文，前缀作为摘要对象
fn summary_request(history: &[Message], split: usize) -> ChatRequest {
    let body = format!(
        "--- Full conversation ---\n{}\n--- Segment to summarize ---\n{}",
        render_transcript(history),
        render_transcript(&history[..split])
    );
    ChatRequest::new(SUMMARY_SYSTEM_PROMPT, vec![Message::user(body)])
}
