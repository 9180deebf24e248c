//! 对话历史的消息模型
//!
//! 历史是有序的 Message 序列：用户输入、Agent 回复（可携带工具调用）、工具结果、摘要。
//! 除摘要压缩（用一条 Summary 替换连续前缀）外，历史只追加。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Agent 请求的一次工具调用：id 用于把 ToolResult 对回调用方
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// 参数作为 JSON 对象（Tool::execute 的入参）
    pub fn args_value(&self) -> Value {
        Value::Object(self.args.clone())
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    User {
        text: String,
    },
    Agent {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
    Summary {
        content: String,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::Agent {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn agent_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Agent {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self::Summary {
            content: content.into(),
        }
    }

    /// 文本内容（各变体的主体字段）
    pub fn content(&self) -> &str {
        match self {
            Self::User { text } => text,
            Self::Agent { content, .. }
            | Self::ToolResult { content, .. }
            | Self::Summary { content } => content,
        }
    }

    /// Agent 消息携带的工具调用；其它变体为空
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Agent { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Agent { .. } => "assistant",
            Self::ToolResult { .. } => "tool",
            Self::Summary { .. } => "summary",
        }
    }
}

/// 把消息渲染为纯文本记录，供摘要与校验 prompt 使用
pub fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        match m {
            Message::Agent {
                content,
                tool_calls,
            } if !tool_calls.is_empty() => {
                let calls: Vec<String> = tool_calls
                    .iter()
                    .map(|c| format!("{}({})", c.name, c.args_value()))
                    .collect();
                out.push_str(&format!(
                    "[assistant] {}\n  tool calls: {}\n",
                    content,
                    calls.join(", ")
                ));
            }
            Message::ToolResult {
                tool_call_id,
                content,
            } => {
                out.push_str(&format!("[tool {}] {}\n", tool_call_id, content));
            }
            other => {
                out.push_str(&format!("[{}] {}\n", other.label(), other.content()));
            }
        }
    }
    out
}
