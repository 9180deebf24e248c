//! Verifier：对最终答案做一次评审（judge），可与 Agent 使用不同模型
//!
//! 评审输入：Agent 的 system prompt、最新答案、与用户的对话、本轮用户输入之后的全部 ToolResult。
//! 评审调用不绑定工具，prompt 按严格度（1–100，越高越严）参数化；
//! 从回复中解析 `VERDICT: PASS|FAIL` 与 `FEEDBACK:`。重试次数由编排器计数。

use std::sync::Arc;

use crate::config::VerificationSection;
use crate::core::SessionState;
use crate::llm::{ChatRequest, LlmClient, LlmError};
use crate::memory::{render_transcript, Message};

const JUDGE_SYSTEM_PROMPT: &str = "You verify the output of an AI assistant. You never call tools.";

const JUDGE_TEMPLATE: &str = "Compare the assistant's instructions, its final answer, the conversation with the user \
and the tool results it used, and decide whether the answer has problems.\n\
Strictness: {strictness} on a scale of 1 to 100. 1 means accept the answer as is, 100 means verify very strictly.\n\
Check whether the answer:\n\
- follows the assistant's instructions\n\
- contains hallucinated or inappropriate content\n\
- is accurate and consistent with the tool results\n\
- contradicts the user's request\n\
- contains inaccurate or misleading statements\n\n\
<assistant_instructions>\n{agent_prompt}\n</assistant_instructions>\n\n\
<final_answer>\n{answer}\n</final_answer>\n\n\
<conversation>\n{conversation}\n</conversation>\n\n\
<tool_results>\n{tool_results}\n</tool_results>\n\n\
Reply in exactly this format:\n\
VERDICT: PASS or FAIL\n\
FEEDBACK: concrete corrections when FAIL, otherwise leave empty";

/// 评审结论
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub feedback: String,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            feedback: String::new(),
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: feedback.into(),
        }
    }
}

fn strip_markup(line: &str) -> &str {
    line.trim().trim_matches(|c: char| matches!(c, '*' | '#' | '_' | '`' | '-' | '>') || c.is_whitespace())
}

/// 解析评审回复；缺少 VERDICT 标记时按通过处理
pub fn parse_verdict(text: &str) -> Verdict {
    let mut passed: Option<bool> = None;
    let mut feedback_lines: Vec<&str> = Vec::new();
    let mut in_feedback = false;

    for raw in text.lines() {
        let line = strip_markup(raw);
        let upper = line.to_uppercase();
        if let Some(rest) = upper.strip_prefix("VERDICT") {
            let rest = rest.trim_start_matches(|c: char| c == ':' || c == '*' || c.is_whitespace());
            if rest.starts_with("FAIL") {
                passed = Some(false);
            } else if rest.starts_with("PASS") {
                passed = Some(true);
            }
            in_feedback = false;
            continue;
        }
        if upper.starts_with("FEEDBACK") {
            let rest = line.get("FEEDBACK".len()..).unwrap_or("");
            let rest = rest.trim_start_matches(|c: char| c == ':' || c == '*' || c.is_whitespace());
            if !rest.is_empty() {
                feedback_lines.push(rest);
            }
            in_feedback = true;
            continue;
        }
        if in_feedback {
            feedback_lines.push(raw.trim_end());
        }
    }

    let feedback = feedback_lines.join("\n").trim().to_string();
    match passed {
        Some(true) => Verdict::pass(),
        Some(false) => Verdict::fail(if feedback.is_empty() {
            "The verifier reported a problem without details.".to_string()
        } else {
            feedback
        }),
        None => {
            tracing::warn!("judge reply has no VERDICT marker, treating as pass");
            Verdict::pass()
        }
    }
}

/// 本轮最近一条用户输入之后的 ToolResult
fn tool_results_since_last_input(history: &[Message]) -> Vec<Message> {
    let start = history
        .iter()
        .rposition(Message::is_user)
        .map(|i| i + 1)
        .unwrap_or(0);
    history[start..]
        .iter()
        .filter(|m| m.is_tool_result())
        .cloned()
        .collect()
}

pub struct Verifier {
    llm: Arc<dyn LlmClient>,
    strictness: u8,
    max_attempts: u32,
}

impl Verifier {
    /// strictness 夹到 1–100，max_attempts 至少为 1
    pub fn new(llm: Arc<dyn LlmClient>, strictness: u8, max_attempts: u32) -> Self {
        Self {
            llm,
            strictness: strictness.clamp(1, 100),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &VerificationSection) -> Self {
        Self::new(llm, config.strictness, config.max_attempts)
    }

    pub fn strictness(&self) -> u8 {
        self.strictness
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 评审 prompt
    pub fn build_prompt(&self, agent_prompt: &str, state: &SessionState) -> String {
        let answer = state.last_agent_content().unwrap_or("");
        let conversation: Vec<Message> = state
            .history
            .iter()
            .filter(|m| !m.is_tool_result())
            .cloned()
            .collect();
        let tool_results = tool_results_since_last_input(&state.history);
        let tool_results = if tool_results.is_empty() {
            "(no tools were used)".to_string()
        } else {
            render_transcript(&tool_results)
        };
        JUDGE_TEMPLATE
            .replace("{strictness}", &self.strictness.to_string())
            .replace("{agent_prompt}", agent_prompt)
            .replace("{answer}", answer)
            .replace("{conversation}", render_transcript(&conversation).trim_end())
            .replace("{tool_results}", tool_results.trim_end())
    }

    /// 一次评审调用（不绑定工具）；调用失败向上返回
    pub async fn judge(&self, agent_prompt: &str, state: &SessionState) -> Result<Verdict, LlmError> {
        let request = ChatRequest::new(
            JUDGE_SYSTEM_PROMPT,
            vec![Message::user(self.build_prompt(agent_prompt, state))],
        );
        let reply = self.llm.generate(&request, None).await?;
        let verdict = parse_verdict(&reply.content);
        tracing::info!(
            session_id = %state.session_id,
            passed = verdict.passed,
            strictness = self.strictness,
            "verification verdict"
        );
        Ok(verdict)
    }

    /// 未通过且未耗尽时写回历史的反馈消息
    pub fn feedback_message(&self, feedback: &str, attempt: u32) -> Message {
        Message::agent(format!(
            "Verification found problems with the previous answer (attempt {}/{}):\n{}\n\
             Revise the answer to address these points.",
            attempt, self.max_attempts, feedback
        ))
    }

    /// 重试耗尽时的升级消息，成为本轮最终答案
    pub fn escalation_message(&self, last_answer: &str, feedback: &str, attempts: u32) -> Message {
        Message::agent(format!(
            "I could not produce an answer that passed verification after {} attempts.\n\
             Last verifier feedback:\n{}\n\nLast answer:\n{}",
            attempts, feedback, last_answer
        ))
    }
}
