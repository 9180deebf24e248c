//! Planner：Agent 步骤的 prompt 组装与模型调用
//!
//! system prompt = 基础角色说明 + 运行环境（OS、日期）+ 工作上下文各字段 + TODO 列表 + 可用工具 + 审批规则；
//! 消息为（可能已摘要的）会话历史。调用时绑定完整工具 schema。

use std::sync::Arc;

use crate::core::SessionState;
use crate::llm::{AgentReply, ChatRequest, LlmClient, LlmError, ToolSpec};
use crate::tools::ToolRegistry;

pub const DEFAULT_BASE_PROMPT: &str = "You are a command-line AI assistant. You answer questions, solve problems \
and research information, always grounding your work in accurate and reliable information.\n\
- Use think_tool to reflect strategically and to plan before acting; resolve unclear requirements by asking the user.\n\
- Use work_tool to keep the working context and the TODO list up to date while you work.\n\
- Prefer reading files and searching before changing anything. Report what you changed.";

const APPROVAL_NOTE: &str = "Tools that change the file system or run commands (write_file, delete_file, create_directory, \
delete_directory, move_path, modify_file_content, run_shell_command) need the user's confirmation. \
If a call is denied or skipped, consider another approach or ask the user for clarification.";

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    base_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, base_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            base_prompt: base_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.base_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 按当前会话状态拼接 system prompt
    pub fn system_prompt(&self, state: &SessionState, registry: &ToolRegistry) -> String {
        let mut out = String::with_capacity(self.base_prompt.len() + 1024);
        out.push_str("<role>\n");
        out.push_str(self.base_prompt.trim());
        out.push_str("\n</role>\n\n<environment>\n");
        out.push_str(&format!("- os: {}\n", std::env::consts::OS));
        out.push_str(&format!("- date: {}\n", chrono::Local::now().format("%Y-%m-%d %H:%M")));
        out.push_str("</environment>\n\n<work_context>\n");
        for (name, value) in state.work_context.fields() {
            out.push_str(&format!("- {}: {}\n", name, value.unwrap_or("(unset)")));
        }
        if state.todo_list.is_empty() {
            out.push_str("- todo_list: (unset)\n");
        } else {
            out.push_str("- todo_list:\n");
            for item in &state.todo_list {
                let mark = if item.completed { "done" } else { "open" };
                out.push_str(&format!("  - [{}] {}\n", mark, item.task));
            }
        }
        out.push_str("</work_context>\n");

        let tools = registry.tool_descriptions();
        if !tools.is_empty() {
            out.push_str("\n<tools>\n");
            for (name, description) in tools {
                out.push_str(&format!("- {}: {}\n", name, description));
            }
            out.push_str("</tools>\n");
        }
        out.push_str("\n<approval>\n");
        out.push_str(APPROVAL_NOTE);
        out.push_str("\n</approval>\n");
        out
    }

    /// 一个 Agent 步骤：绑定工具 schema 调用模型
    pub async fn step(
        &self,
        state: &SessionState,
        registry: &ToolRegistry,
        tools: &[ToolSpec],
    ) -> Result<AgentReply, LlmError> {
        let request = ChatRequest::new(self.system_prompt(state, registry), state.history.clone());
        tracing::debug!(
            session_id = %state.session_id,
            messages = request.messages.len(),
            tools = tools.len(),
            "agent step"
        );
        self.llm.generate(&request, Some(tools)).await
    }
}
