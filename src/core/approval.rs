//! 工具审批闸门
//!
//! 每个待执行的工具调用按以下顺序判定：
//! 1. 只读工具，或工具名已在会话放行集合中 → AutoAllow，不询问；
//! 2. 否则向操作者展示工具名与参数，提供三个选项：执行一次 / 本会话始终放行 / 拒绝；
//! 3. 无操作者（输入结束）→ Unavailable；无法识别的回答 → InvalidChoice，不自动重问。
//!
//! 未执行的调用得到一条说明原因的 ToolResult，反馈给 Agent 重新规划。
//! 放行集合只做并集：同一批次中较早的「始终放行」对后续同名调用立即生效。

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolRegistry;

/// 单个调用的审批结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    AutoAllow,
    OnceAllow,
    AlwaysAllow,
    Deny,
    Unavailable,
    InvalidChoice,
}

impl ApprovalDecision {
    /// 把操作者的回答映射为决定；None 表示输入已结束
    pub fn from_answer(answer: Option<&str>) -> Self {
        match answer.map(str::trim) {
            None => Self::Unavailable,
            Some("1") => Self::OnceAllow,
            Some("2") => Self::AlwaysAllow,
            Some("3") => Self::Deny,
            Some(_) => Self::InvalidChoice,
        }
    }

    /// 是否执行该调用
    pub fn executes(self) -> bool {
        matches!(self, Self::AutoAllow | Self::OnceAllow | Self::AlwaysAllow)
    }

    /// 未执行时写入历史的 ToolResult 文本
    pub fn refusal_text(self, tool: &str) -> Option<String> {
        match self {
            Self::Deny => Some(format!(
                "Tool '{}' was denied by the user. Consider another approach or ask the user for clarification.",
                tool
            )),
            Self::Unavailable => Some(format!(
                "Tool '{}' was skipped: no confirmation channel is available (non-interactive session).",
                tool
            )),
            Self::InvalidChoice => Some(format!(
                "Tool '{}' was skipped: the confirmation choice was invalid.",
                tool
            )),
            Self::AutoAllow | Self::OnceAllow | Self::AlwaysAllow => None,
        }
    }
}

/// 操作者确认通道：返回 "1" / "2" / "3" 之一，或 None 表示输入结束
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn prompt(&self, question: &str) -> Option<String>;
}

/// 非交互环境：立即返回 None，不阻塞
#[derive(Debug, Default)]
pub struct NonInteractiveOperator;

#[async_trait]
impl OperatorChannel for NonInteractiveOperator {
    async fn prompt(&self, _question: &str) -> Option<String> {
        None
    }
}

/// 脚本化操作者：按顺序返回预设回答，耗尽后视为输入结束；记录收到的每个问题
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<Option<String>>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new<'a>(answers: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| Some(a.to_string())).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn push_answer(&self, answer: &str) {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(Some(answer.to_string()));
        }
    }

    /// 追加一次「输入结束」
    pub fn push_eof(&self) {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(None);
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn prompt_count(&self) -> usize {
        self.questions.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl OperatorChannel for ScriptedOperator {
    async fn prompt(&self, question: &str) -> Option<String> {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(question.to_string());
        }
        self.answers.lock().ok().and_then(|mut a| a.pop_front()).flatten()
    }
}

/// 一批调用的审批结果
#[derive(Clone, Debug, Default)]
pub struct ApprovalReview {
    /// 与输入调用一一对应的决定
    pub decisions: Vec<ApprovalDecision>,
    /// 获准执行的调用（保持原顺序）
    pub approved: Vec<ToolCallRequest>,
    /// 未执行调用的 ToolResult
    pub refused: Vec<Message>,
    /// 审批后的放行集合（输入集合与新授权的并集）
    pub always_allowed: BTreeSet<String>,
}

impl ApprovalReview {
    /// 本批次新增的放行工具
    pub fn granted<'a>(&'a self, before: &'a BTreeSet<String>) -> impl Iterator<Item = &'a String> + 'a {
        self.always_allowed.difference(before)
    }
}

/// 确认提示文本
pub fn confirmation_question(call: &ToolCallRequest) -> String {
    format!(
        "--- Tool execution confirmation ---\n\
         The agent wants to run '{name}' with arguments: {args}\n\
         Choices:\n  \
         1. Allow once\n  \
         2. Always allow '{name}' for this session\n  \
         3. Deny\n\
         Choice (1/2/3): ",
        name = call.name,
        args = call.args_value()
    )
}

pub struct ApprovalGate {
    operator: std::sync::Arc<dyn OperatorChannel>,
}

impl ApprovalGate {
    pub fn new(operator: std::sync::Arc<dyn OperatorChannel>) -> Self {
        Self { operator }
    }

    /// 逐个审批；询问是唯一的挂起点，期间不做其它工作
    pub async fn review(
        &self,
        registry: &ToolRegistry,
        calls: &[ToolCallRequest],
        always_allowed: &BTreeSet<String>,
    ) -> ApprovalReview {
        let mut review = ApprovalReview {
            always_allowed: always_allowed.clone(),
            ..ApprovalReview::default()
        };

        for call in calls {
            let decision = match registry.is_mutating(&call.name) {
                // 未注册的工具不打扰操作者，由调用器报告
                None | Some(false) => ApprovalDecision::AutoAllow,
                Some(true) if review.always_allowed.contains(&call.name) => {
                    ApprovalDecision::AutoAllow
                }
                Some(true) => {
                    let answer = self.operator.prompt(&confirmation_question(call)).await;
                    ApprovalDecision::from_answer(answer.as_deref())
                }
            };
            tracing::info!(tool = %call.name, call_id = %call.id, decision = ?decision, "approval resolved");

            if decision == ApprovalDecision::AlwaysAllow {
                review.always_allowed.insert(call.name.clone());
            }
            match decision.refusal_text(&call.name) {
                None => review.approved.push(call.clone()),
                Some(text) => review.refused.push(Message::tool_result(call.id.clone(), text)),
            }
            review.decisions.push(decision);
        }
        review
    }
}
