//! 会话状态与合并规则
//!
//! SessionState 在会话首轮创建，此后每个编排步骤读写它，轮次之间按 session id 持久化。
//! 步骤输出统一表达为 SessionPatch，由 `SessionState::apply` 逐字段合并：
//!
//! | 字段                   | 合并方式                                   |
//! |------------------------|--------------------------------------------|
//! | history                | 追加                                       |
//! | always_allowed_tools   | 集合并（只增不减）                         |
//! | work_context.*         | 按字段 last-writer-wins，未提供的字段保留 |
//! | todo_list              | 整体替换，随后按 task 去重                 |

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 工作上下文：只转发给 prompt 的自由文本字段，核心不解析
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WorkContext {
    /// Overall policy for the work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_policy: Option<String>,
    /// Role the agent plays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_role: Option<String>,
    /// Rules to follow while working
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_rules: Option<String>,
    /// Current work plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_plan: Option<String>,
    /// What is being worked on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_content: Option<String>,
    /// Purpose of the work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_purpose: Option<String>,
    /// Results so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_results: Option<String>,
    /// Open issues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_issues: Option<String>,
    /// Countermeasures for the open issues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_countermeasures: Option<String>,
    /// Next steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memos: Option<String>,
}

impl WorkContext {
    /// 字段名与当前值，顺序固定（prompt 渲染用）
    pub fn fields(&self) -> [(&'static str, Option<&str>); 11] {
        [
            ("overall_policy", self.overall_policy.as_deref()),
            ("worker_role", self.worker_role.as_deref()),
            ("work_rules", self.work_rules.as_deref()),
            ("work_plan", self.work_plan.as_deref()),
            ("work_content", self.work_content.as_deref()),
            ("work_purpose", self.work_purpose.as_deref()),
            ("work_results", self.work_results.as_deref()),
            ("current_issues", self.current_issues.as_deref()),
            ("issue_countermeasures", self.issue_countermeasures.as_deref()),
            ("next_steps", self.next_steps.as_deref()),
            ("memos", self.memos.as_deref()),
        ]
    }

    /// 已设置的字段名
    pub fn set_field_names(&self) -> Vec<&'static str> {
        self.fields()
            .into_iter()
            .filter_map(|(name, value)| value.map(|_| name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_none())
    }

    /// last-writer-wins：other 中有值的字段覆盖当前值，其余保留
    pub fn merge(&mut self, other: WorkContext) {
        fn take(slot: &mut Option<String>, incoming: Option<String>) {
            if incoming.is_some() {
                *slot = incoming;
            }
        }
        take(&mut self.overall_policy, other.overall_policy);
        take(&mut self.worker_role, other.worker_role);
        take(&mut self.work_rules, other.work_rules);
        take(&mut self.work_plan, other.work_plan);
        take(&mut self.work_content, other.work_content);
        take(&mut self.work_purpose, other.work_purpose);
        take(&mut self.work_results, other.work_results);
        take(&mut self.current_issues, other.current_issues);
        take(&mut self.issue_countermeasures, other.issue_countermeasures);
        take(&mut self.next_steps, other.next_steps);
        take(&mut self.memos, other.memos);
    }
}

/// TODO 列表项
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TodoItem {
    /// Task description; must be unique within the list
    pub task: String,
    /// Whether the task is done
    #[serde(default)]
    pub completed: bool,
}

impl TodoItem {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            completed: false,
        }
    }
}

/// 按 task 文本去重：保留首次出现的位置，completed 取最后一次出现的值
pub fn dedup_todos(items: Vec<TodoItem>) -> Vec<TodoItem> {
    let mut out: Vec<TodoItem> = Vec::with_capacity(items.len());
    for item in items {
        match out.iter_mut().find(|existing| existing.task == item.task) {
            Some(existing) => existing.completed = item.completed,
            None => out.push(item),
        }
    }
    out
}

/// 会话状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// 当前轮次的用户输入
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub always_allowed_tools: BTreeSet<String>,
    #[serde(default)]
    pub work_context: WorkContext,
    #[serde(default)]
    pub todo_list: Vec<TodoItem>,
    /// 当前连续校验-重答链上的失败次数
    #[serde(default)]
    pub verification_attempts: u32,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// 按字段合并一个步骤的输出
    pub fn apply(&mut self, patch: SessionPatch) {
        self.history.extend(patch.history);
        self.always_allowed_tools.extend(patch.always_allowed_tools);
        self.work_context.merge(patch.work_context);
        if let Some(todos) = patch.todo_list {
            self.todo_list = dedup_todos(todos);
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.apply(SessionPatch::message(message));
    }

    /// 最近一条 Agent 消息的文本
    pub fn last_agent_content(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|m| m.is_agent())
            .map(Message::content)
    }
}

/// 一个步骤对会话状态的增量
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionPatch {
    pub history: Vec<Message>,
    pub always_allowed_tools: BTreeSet<String>,
    pub work_context: WorkContext,
    pub todo_list: Option<Vec<TodoItem>>,
}

impl SessionPatch {
    pub fn message(message: Message) -> Self {
        Self {
            history: vec![message],
            ..Self::default()
        }
    }

    /// 合并另一个补丁（与 SessionState::apply 同样的逐字段规则）
    pub fn merge(&mut self, other: SessionPatch) {
        self.history.extend(other.history);
        self.always_allowed_tools.extend(other.always_allowed_tools);
        self.work_context.merge(other.work_context);
        if other.todo_list.is_some() {
            self.todo_list = other.todo_list;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
            && self.always_allowed_tools.is_empty()
            && self.work_context.is_empty()
            && self.todo_list.is_none()
    }
}

/// 编排状态机的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Agent,
    ToolExecution,
    Verification,
    Terminal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_context_last_writer_wins_per_field() {
        let mut ctx = WorkContext {
            work_plan: Some("plan A".into()),
            memos: Some("keep me".into()),
            ..WorkContext::default()
        };
        ctx.merge(WorkContext {
            work_plan: Some("plan B".into()),
            next_steps: Some("write tests".into()),
            ..WorkContext::default()
        });
        assert_eq!(ctx.work_plan.as_deref(), Some("plan B"));
        assert_eq!(ctx.memos.as_deref(), Some("keep me"));
        assert_eq!(ctx.next_steps.as_deref(), Some("write tests"));
        assert_eq!(ctx.set_field_names(), vec!["work_plan", "next_steps", "memos"]);
    }

    #[test]
    fn test_dedup_todos_keeps_first_position_last_status() {
        let todos = dedup_todos(vec![
            TodoItem::new("a"),
            TodoItem::new("b"),
            TodoItem {
                task: "a".into(),
                completed: true,
            },
        ]);
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].task, "a");
        assert!(todos[0].completed);
        assert_eq!(todos[1].task, "b");
    }

    #[test]
    fn test_apply_unions_allow_list() {
        let mut state = SessionState::new("s");
        let mut first = SessionPatch::default();
        first.always_allowed_tools.insert("write_file".into());
        state.apply(first);

        let mut second = SessionPatch::default();
        second.always_allowed_tools.insert("delete_file".into());
        state.apply(second);
        state.apply(SessionPatch::default());

        let names: Vec<&str> = state.always_allowed_tools.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["delete_file", "write_file"]);
    }

    #[test]
    fn test_apply_todo_list_replaced_and_deduped() {
        let mut state = SessionState::new("s");
        state.todo_list = vec![TodoItem::new("old")];
        state.apply(SessionPatch {
            todo_list: Some(vec![TodoItem::new("x"), TodoItem::new("x")]),
            ..SessionPatch::default()
        });
        assert_eq!(state.todo_list, vec![TodoItem::new("x")]);

        // 未提供 todo_list 的补丁不影响现有列表
        state.apply(SessionPatch::message(Message::user("hi")));
        assert_eq!(state.todo_list.len(), 1);
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_patch_merge_then_apply() {
        let mut patch = SessionPatch::message(Message::tool_result("c1", "ok"));
        patch.merge(SessionPatch {
            work_context: WorkContext {
                memos: Some("m".into()),
                ..WorkContext::default()
            },
            ..SessionPatch::message(Message::tool_result("c2", "ok"))
        });
        let mut state = SessionState::new("s");
        state.apply(patch);
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.work_context.memos.as_deref(), Some("m"));
    }
}
