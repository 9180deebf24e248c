//! 工具调用器
//!
//! 持有 ToolRegistry 与全局超时。invoke 在独立任务中执行工具并施加超时：
//! 工具返回 Err、超时、panic、未注册的工具名，全部转为带工具名的 ToolResult 文本，
//! 单个工具失败不会中止整轮。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::core::SessionPatch;
use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolRegistry;

/// 工具失败时写入 ToolResult 的文本
pub fn tool_error_text(tool: &str, reason: &str) -> String {
    format!("Error: tool '{}' failed: {}", tool, reason)
}

/// 一次调用的结果：ToolResult 消息，以及成功时工具产生的会话增量
#[derive(Clone, Debug)]
pub struct Invocation {
    pub call_id: String,
    pub tool: String,
    pub result: Message,
    pub patch: Option<SessionPatch>,
    pub ok: bool,
}

impl Invocation {
    fn failed(call: &ToolCallRequest, text: String) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            result: Message::tool_result(call.id.clone(), text),
            patch: None,
            ok: false,
        }
    }
}

pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs.max(1)))
    }

    pub fn with_timeout(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行一次已批准的调用，永不返回错误
    pub async fn invoke(&self, call: &ToolCallRequest) -> Invocation {
        let start = Instant::now();
        let args = call.args_value();
        let args_preview = args_preview(&args);

        let Some(tool) = self.registry.get(&call.name) else {
            audit(&call.name, false, "error", start, &args_preview);
            return Invocation::failed(call, format!("Error: unknown tool '{}'", call.name));
        };

        let task_tool = Arc::clone(&tool);
        let task_args = args.clone();
        let mut handle = tokio::spawn(async move { task_tool.execute(task_args).await });
        let outcome = match timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    "tool panicked".to_string()
                } else {
                    join_error.to_string()
                };
                Err(reason)
            }
            Err(_) => {
                handle.abort();
                audit(&call.name, false, "timeout", start, &args_preview);
                return Invocation::failed(
                    call,
                    tool_error_text(
                        &call.name,
                        &format!("timed out after {}s", self.timeout.as_secs_f64()),
                    ),
                );
            }
        };

        match outcome {
            Ok(content) => {
                audit(&call.name, true, "ok", start, &args_preview);
                Invocation {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    result: Message::tool_result(call.id.clone(), content),
                    patch: tool.session_patch(&args),
                    ok: true,
                }
            }
            Err(reason) => {
                audit(&call.name, false, "error", start, &args_preview);
                Invocation::failed(call, tool_error_text(&call.name, &reason))
            }
        }
    }

    /// 并发执行多个调用；返回顺序与输入一致，调用方仍应按 call_id 对齐
    pub async fn invoke_all(&self, calls: &[ToolCallRequest]) -> Vec<Invocation> {
        join_all(calls.iter().map(|call| self.invoke(call))).await
    }
}

fn audit(tool: &str, ok: bool, outcome: &str, start: Instant, args_preview: &str) {
    let duration_ms = start.elapsed().as_millis() as u64;
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    struct Fixed(&'static str, Result<&'static str, &'static str>);

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "fixed"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            self.1.map(str::to_string).map_err(str::to_string)
        }
    }

    struct Panics;

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            panic!("boom")
        }
    }

    struct Sleeps;

    #[async_trait]
    impl Tool for Sleeps {
        fn name(&self) -> &str {
            "sleeps"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }
    }

    fn invoker() -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(Fixed("good", Ok("fine")));
        registry.register(Fixed("bad", Err("disk full")));
        registry.register(Panics);
        registry.register(Sleeps);
        ToolInvoker::with_timeout(Arc::new(registry), Duration::from_millis(100))
    }

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, Map::new())
    }

    #[tokio::test]
    async fn test_success_and_error_results() {
        let invoker = invoker();
        let ok = invoker.invoke(&call("c1", "good")).await;
        assert!(ok.ok);
        assert_eq!(ok.result, Message::tool_result("c1", "fine"));

        let bad = invoker.invoke(&call("c2", "bad")).await;
        assert!(!bad.ok);
        assert_eq!(bad.result.content(), "Error: tool 'bad' failed: disk full");
    }

    #[tokio::test]
    async fn test_panic_timeout_and_unknown_become_results() {
        let invoker = invoker();
        let panicked = invoker.invoke(&call("p", "panics")).await;
        assert!(!panicked.ok);
        assert!(panicked.result.content().contains("'panics'"));

        let slow = invoker.invoke(&call("s", "sleeps")).await;
        assert!(!slow.ok);
        assert!(slow.result.content().contains("timed out"));

        let unknown = invoker.invoke(&call("u", "nope")).await;
        assert_eq!(unknown.result.content(), "Error: unknown tool 'nope'");
        assert!(unknown.result.is_tool_result());
    }

    #[tokio::test]
    async fn test_invoke_all_resolves_every_call() {
        let invoker = invoker();
        let calls = vec![call("a", "sleeps"), call("b", "good"), call("c", "bad")];
        let results = invoker.invoke_all(&calls).await;
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(results.iter().filter(|r| r.ok).count(), 1);
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = Value::String("x".repeat(500));
        let preview = args_preview(&long);
        assert_eq!(preview.chars().count(), 203);
    }
}
