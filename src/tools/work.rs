//! work_tool：更新工作上下文字段与 TODO 列表
//!
//! 执行本身只校验参数并回报更新了哪些字段；真正的状态变更通过 `session_patch` 交给编排器，
//! 按 SessionState 的合并规则应用（字段 last-writer-wins，todo_list 整体替换后去重）。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{dedup_todos, SessionPatch, TodoItem, WorkContext};
use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

#[derive(Deserialize, JsonSchema)]
struct WorkToolArgs {
    #[serde(flatten)]
    context: WorkContext,
    /// Complete TODO list; replaces the current one. Task texts must be unique.
    #[serde(default)]
    todo_list: Option<Vec<TodoItem>>,
}

pub struct WorkTool;

impl WorkTool {
    fn parse(args: &Value) -> Result<WorkToolArgs, String> {
        parse_args(args.clone())
    }
}

#[async_trait]
impl Tool for WorkTool {
    fn name(&self) -> &str {
        "work_tool"
    }

    fn description(&self) -> &str {
        "Update the working context (policy, role, rules, plan, content, purpose, results, issues, \
         countermeasures, next steps, memos) and the TODO list. Only the fields you pass are changed; \
         todo_list replaces the whole list."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<WorkToolArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    fn session_patch(&self, args: &Value) -> Option<SessionPatch> {
        let args = Self::parse(args).ok()?;
        Some(SessionPatch {
            work_context: args.context,
            todo_list: args.todo_list,
            ..SessionPatch::default()
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = Self::parse(&args)?;
        let mut parts: Vec<String> = args
            .context
            .set_field_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let todo_summary = args.todo_list.map(|todos| {
            let todos = dedup_todos(todos);
            let done = todos.iter().filter(|t| t.completed).count();
            format!("todo_list ({} items, {} done)", todos.len(), done)
        });
        if parts.is_empty() && todo_summary.is_none() {
            return Err("no fields to update".to_string());
        }
        parts.extend(todo_summary);
        Ok(format!("Work state updated: {}", parts.join(", ")))
    }
}
