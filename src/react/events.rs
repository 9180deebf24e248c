//! 单轮过程事件：供前端展示 Agent 的内部过程（inner thoughts）

use serde::Serialize;

use crate::core::ApprovalDecision;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 开始第几个 Agent 步骤
    StepStarted { step: usize },
    /// 模型回复文本（可能为空，仅有工具调用时）
    AgentMessage { content: String },
    /// 模型请求的工具调用
    ToolCall {
        id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 审批结果
    ApprovalResolved {
        tool: String,
        decision: ApprovalDecision,
    },
    /// 工具返回（预览，避免过长）
    ToolResult { id: String, preview: String },
    /// 历史被摘要压缩
    Summarized { removed: usize, kept: usize },
    /// 摘要失败，本轮不压缩
    SummarizationSkipped { reason: String },
    /// 校验结论
    VerificationVerdict {
        passed: bool,
        attempt: u32,
        feedback: String,
    },
    /// 校验重试耗尽，升级给用户
    Escalated { attempts: u32 },
    /// 达到单轮步数上限
    StepLimitReached { max_steps: usize },
}

/// 截断为预览（按字符）
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
