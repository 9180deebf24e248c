//! 单轮状态机集成测试：脚本化模型 + 脚本化操作者 + 测试工具，端到端驱动 Orchestrator

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use warden::core::{
    AgentError, ApprovalGate, Orchestrator, ScriptedOperator, SessionState, TodoItem, TurnEnding,
};
use warden::llm::{AgentReply, LlmClient, LlmError, ScriptedLlm};
use warden::memory::{
    HistoryManager, InMemorySessionStore, Message, SessionStore, SqliteSessionStore,
    ToolCallRequest,
};
use warden::react::{Planner, TurnEvent, Verifier};
use warden::tools::{Tool, ToolInvoker, ToolRegistry, WorkTool};

/// 计数的写工具（mutating）
#[derive(Default)]
struct CountingWrite {
    runs: AtomicUsize,
}

#[async_trait]
impl Tool for CountingWrite {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "write a file"
    }
    async fn execute(&self, _args: Value) -> Result<String, String> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok("wrote".into())
    }
}

/// 声明为只读，但名字是命令执行能力
struct ShellLike;

#[async_trait]
impl Tool for ShellLike {
    fn name(&self) -> &str {
        "run_shell_command"
    }
    fn description(&self) -> &str {
        "run a command"
    }
    fn mutating(&self) -> bool {
        false
    }
    async fn execute(&self, _args: Value) -> Result<String, String> {
        Ok("ran".into())
    }
}

struct Flaky;

#[async_trait]
impl Tool for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn mutating(&self) -> bool {
        false
    }
    async fn execute(&self, _args: Value) -> Result<String, String> {
        Err("disk on fire".into())
    }
}

struct Boom;

#[async_trait]
impl Tool for Boom {
    fn name(&self) -> &str {
        "boom"
    }
    fn description(&self) -> &str {
        "panics"
    }
    fn mutating(&self) -> bool {
        false
    }
    async fn execute(&self, _args: Value) -> Result<String, String> {
        panic!("boom");
    }
}

/// 按参数 delay_ms 延迟后回显 label
struct Sleepy;

#[async_trait]
impl Tool for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }
    fn description(&self) -> &str {
        "sleeps then echoes"
    }
    fn mutating(&self) -> bool {
        false
    }
    async fn execute(&self, args: Value) -> Result<String, String> {
        let delay = args["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(format!("label={}", args["label"].as_str().unwrap_or("")))
    }
}

fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
    let args: Map<String, Value> = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCallRequest::new(id, name, args)
}

struct Harness {
    llm: Arc<ScriptedLlm>,
    operator: Arc<ScriptedOperator>,
    writes: Arc<CountingWrite>,
    store: Arc<dyn SessionStore>,
}

impl Harness {
    fn new(operator: ScriptedOperator) -> Self {
        Self::with_store(operator, Arc::new(InMemorySessionStore::new()))
    }

    fn with_store(operator: ScriptedOperator, store: Arc<dyn SessionStore>) -> Self {
        Self {
            llm: Arc::new(ScriptedLlm::new([])),
            operator: Arc::new(operator),
            writes: Arc::new(CountingWrite::default()),
            store,
        }
    }

    fn registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_arc(self.writes.clone());
        registry.register(ShellLike);
        registry.register(Flaky);
        registry.register(Boom);
        registry.register(Sleepy);
        registry.register(WorkTool);
        registry
    }

    /// max_turns = 0：不摘要
    fn orchestrator(&self, max_turns: usize, keep_turns: usize) -> Orchestrator {
        let llm: Arc<dyn LlmClient> = self.llm.clone();
        Orchestrator::new(
            Planner::new(llm.clone(), "test agent"),
            HistoryManager::new(llm, max_turns, keep_turns),
            ApprovalGate::new(self.operator.clone()),
            ToolInvoker::new(Arc::new(self.registry()), 5),
            self.store.clone(),
        )
    }

    fn verifying(&self, max_attempts: u32) -> Orchestrator {
        let llm: Arc<dyn LlmClient> = self.llm.clone();
        self.orchestrator(0, 5)
            .with_verifier(Verifier::new(llm, 70, max_attempts))
    }

    fn script(&self, replies: impl IntoIterator<Item = AgentReply>) {
        for reply in replies {
            self.llm.push_reply(reply);
        }
    }

    async fn state(&self, session_id: &str) -> SessionState {
        self.store.get(session_id).await.unwrap().unwrap()
    }
}

fn tool_results(state: &SessionState) -> Vec<(String, String)> {
    state
        .history
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult {
                tool_call_id,
                content,
            } => Some((tool_call_id.clone(), content.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn scenario_a_ten_prior_messages_compact_to_summary_plus_five() {
    let h = Harness::new(ScriptedOperator::default());
    let mut prior = SessionState::new("s");
    for i in 0..10 {
        prior.push_message(if i % 2 == 0 {
            Message::user(format!("q{}", i))
        } else {
            Message::agent(format!("a{}", i))
        });
    }
    h.store.put("s", &prior).await.unwrap();
    h.script([AgentReply::text("a11"), AgentReply::text("earlier talk")]);

    let orch = h.orchestrator(10, 5);
    let outcome = orch.run_turn("s", "q10").await.unwrap();
    assert_eq!(outcome.answer, "a11");

    let state = h.state("s").await;
    assert_eq!(state.history.len(), 6);
    assert_eq!(state.history[0], Message::summary("earlier talk"));
    assert!(state.history[1..].iter().all(|m| !matches!(m, Message::Summary { .. })));
    assert_eq!(state.history[5], Message::agent("a11"));

    // 摘要调用不绑定工具
    let calls = h.llm.calls();
    assert!(calls[0].tools_bound);
    assert!(!calls[1].tools_bound);
}

#[tokio::test]
async fn compaction_keeps_tool_calls_with_their_results() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([
        AgentReply::with_calls(
            "",
            vec![
                call("c1", "sleepy", json!({"label": "x"})),
                call("c2", "sleepy", json!({"label": "y"})),
            ],
        ),
        AgentReply::text("done"),
        AgentReply::text("summary of the start"),
    ]);

    // user, call, result, result, done：从 5-2=3 回退到发起调用的消息之前
    let orch = h.orchestrator(4, 2);
    orch.run_turn("s", "go").await.unwrap();

    let state = h.state("s").await;
    assert_eq!(state.history[0], Message::summary("summary of the start"));
    assert!(state.history[1].has_tool_calls());
    assert_eq!(state.history.len(), 5);
    for (i, m) in state.history.iter().enumerate() {
        if m.is_tool_result() {
            // 每条 ToolResult 前面要么是同批 ToolResult，要么是发起调用的 Agent 消息
            let prev = &state.history[i - 1];
            assert!(prev.is_tool_result() || prev.has_tool_calls(), "orphaned result at {}", i);
        }
    }
}

#[tokio::test]
async fn summarization_failure_keeps_history_and_turn_continues() {
    let h = Harness::new(ScriptedOperator::default());
    let mut prior = SessionState::new("s");
    for i in 0..4 {
        prior.push_message(Message::user(format!("m{}", i)));
    }
    h.store.put("s", &prior).await.unwrap();
    h.script([AgentReply::text("answer")]);
    h.llm.push_error(LlmError::Unavailable("summarizer down".into()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let orch = h.orchestrator(3, 1).with_events(tx);
    let outcome = orch.run_turn("s", "next").await.unwrap();
    assert_eq!(outcome.answer, "answer");
    assert_eq!(h.state("s").await.history.len(), 6);

    let mut skipped = false;
    while let Ok(event) = rx.try_recv() {
        skipped |= matches!(event, TurnEvent::SummarizationSkipped { .. });
    }
    assert!(skipped);
}

#[tokio::test]
async fn scenario_b_always_allow_skips_later_prompts() {
    let h = Harness::new(ScriptedOperator::new(["2"]));
    h.script([
        AgentReply::with_calls("", vec![call("c1", "write_file", json!({"path": "a"}))]),
        AgentReply::text("first done"),
        AgentReply::with_calls("", vec![call("c2", "write_file", json!({"path": "b"}))]),
        AgentReply::text("second done"),
    ]);
    let orch = h.orchestrator(0, 5);

    orch.run_turn("s", "write a").await.unwrap();
    assert_eq!(h.writes.runs.load(Ordering::SeqCst), 1);
    assert_eq!(h.operator.prompt_count(), 1);
    assert!(h.state("s").await.always_allowed_tools.contains("write_file"));

    orch.run_turn("s", "write b").await.unwrap();
    assert_eq!(h.writes.runs.load(Ordering::SeqCst), 2);
    assert_eq!(h.operator.prompt_count(), 1);
    let state = h.state("s").await;
    assert_eq!(
        tool_results(&state),
        vec![("c1".to_string(), "wrote".to_string()), ("c2".to_string(), "wrote".to_string())]
    );
}

#[tokio::test]
async fn allow_list_grant_covers_rest_of_batch_and_only_grows() {
    // 第一次回答「始终放行」，同批第二个 write_file 不再询问；拒绝 shell 不会收回放行
    let h = Harness::new(ScriptedOperator::new(["2", "3"]));
    h.script([
        AgentReply::with_calls(
            "",
            vec![
                call("c1", "write_file", json!({})),
                call("c2", "write_file", json!({})),
                call("c3", "run_shell_command", json!({"command": "ls"})),
            ],
        ),
        AgentReply::text("ok"),
    ]);
    let orch = h.orchestrator(0, 5);
    orch.run_turn("s", "go").await.unwrap();

    assert_eq!(h.operator.prompt_count(), 2);
    assert_eq!(h.writes.runs.load(Ordering::SeqCst), 2);
    let state = h.state("s").await;
    assert_eq!(state.always_allowed_tools.len(), 1);
    assert!(state.always_allowed_tools.contains("write_file"));
    let results = tool_results(&state);
    assert!(results[2].1.contains("denied by the user"));
}

#[tokio::test]
async fn command_execution_tool_always_needs_confirmation() {
    let h = Harness::new(ScriptedOperator::new(["1"]));
    h.script([
        AgentReply::with_calls("", vec![call("c1", "run_shell_command", json!({"command": "ls"}))]),
        AgentReply::text("listed"),
    ]);
    let orch = h.orchestrator(0, 5);
    orch.run_turn("s", "ls").await.unwrap();

    assert_eq!(h.operator.prompt_count(), 1);
    assert!(h.operator.questions()[0].contains("run_shell_command"));
    assert_eq!(tool_results(&h.state("s").await)[0].1, "ran");
}

#[tokio::test]
async fn scenario_c_end_of_input_is_distinct_from_denial() {
    let h = Harness::new(ScriptedOperator::new(["3"]));
    h.script([
        AgentReply::with_calls("", vec![call("c1", "write_file", json!({}))]),
        AgentReply::text("ok, not writing"),
        AgentReply::with_calls("", vec![call("c2", "write_file", json!({}))]),
        AgentReply::text("skipped"),
    ]);
    let orch = h.orchestrator(0, 5);

    orch.run_turn("s", "write").await.unwrap();
    // 回答用尽：输入结束
    orch.run_turn("s", "write again").await.unwrap();

    assert_eq!(h.writes.runs.load(Ordering::SeqCst), 0);
    let results = tool_results(&h.state("s").await);
    let denied = &results[0].1;
    let skipped = &results[1].1;
    assert!(denied.contains("denied by the user"));
    assert!(skipped.contains("no confirmation channel"));
    assert_ne!(denied, skipped);
}

#[tokio::test]
async fn invalid_choice_is_not_reprompted() {
    let h = Harness::new(ScriptedOperator::new(["maybe", "1"]));
    h.script([
        AgentReply::with_calls("", vec![call("c1", "write_file", json!({}))]),
        AgentReply::text("fine"),
    ]);
    let orch = h.orchestrator(0, 5);
    orch.run_turn("s", "write").await.unwrap();

    assert_eq!(h.operator.prompt_count(), 1);
    assert_eq!(h.writes.runs.load(Ordering::SeqCst), 0);
    assert!(tool_results(&h.state("s").await)[0]
        .1
        .contains("confirmation choice was invalid"));
}

#[tokio::test]
async fn scenario_d_three_failures_escalate_and_reset_counter() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([
        AgentReply::text("answer 1"),
        AgentReply::text("VERDICT: FAIL\nFEEDBACK: wrong date"),
        AgentReply::text("answer 2"),
        AgentReply::text("VERDICT: FAIL\nFEEDBACK: still wrong"),
        AgentReply::text("answer 3"),
        AgentReply::text("VERDICT: FAIL\nFEEDBACK: give up on the date"),
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orch = h.verifying(3).with_events(tx);

    let outcome = orch.run_turn("s", "what day is it?").await.unwrap();
    assert_eq!(outcome.ending, TurnEnding::Escalated);
    assert!(outcome.answer.contains("after 3 attempts"));
    assert!(outcome.answer.contains("give up on the date"));
    assert!(outcome.answer.contains("answer 3"));
    assert_eq!(outcome.steps, 3);

    let state = h.state("s").await;
    assert_eq!(state.verification_attempts, 0);
    let feedback = state
        .history
        .iter()
        .filter(|m| m.content().starts_with("Verification found problems"))
        .count();
    assert_eq!(feedback, 2);

    // 评审调用都不绑定工具
    let calls = h.llm.calls();
    assert_eq!(calls.len(), 6);
    for (i, c) in calls.iter().enumerate() {
        assert_eq!(c.tools_bound, i % 2 == 0);
    }

    let mut attempts = Vec::new();
    let mut escalated = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            TurnEvent::VerificationVerdict { passed: false, attempt, .. } => attempts.push(attempt),
            TurnEvent::Escalated { attempts: 3 } => escalated = true,
            _ => {}
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(escalated);
}

#[tokio::test]
async fn verification_pass_after_feedback_resets_counter() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([
        AgentReply::text("draft"),
        AgentReply::text("VERDICT: FAIL\nFEEDBACK: cite a source"),
        AgentReply::text("final with source"),
        AgentReply::text("VERDICT: PASS"),
    ]);
    let orch = h.verifying(3);
    let outcome = orch.run_turn("s", "explain").await.unwrap();
    assert_eq!(outcome.ending, TurnEnding::Verified);
    assert_eq!(outcome.answer, "final with source");
    assert_eq!(h.state("s").await.verification_attempts, 0);

    // 反馈消息在第二次 Agent 调用中可见
    let second_agent_call = &h.llm.calls()[2];
    assert!(second_agent_call
        .request
        .messages
        .iter()
        .any(|m| m.content().contains("cite a source")));
}

#[tokio::test]
async fn step_limit_after_failed_verification_quotes_agent_answer() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([
        AgentReply::text("the real answer"),
        AgentReply::text("VERDICT: FAIL\nFEEDBACK: wrong"),
    ]);
    let orch = h.verifying(3).with_max_steps(1);
    let outcome = orch.run_turn("s", "question").await.unwrap();
    assert_eq!(outcome.ending, TurnEnding::StepLimit);
    assert_eq!(outcome.steps, 1);
    assert!(outcome.answer.contains("Last agent output:\nthe real answer"));
    assert!(!outcome.answer.contains("Verification found problems"));
    assert_eq!(h.llm.call_count(), 2);

    let state = h.state("s").await;
    assert_eq!(state.verification_attempts, 0);
    assert_eq!(state.history.last().unwrap().content(), outcome.answer);
}

#[tokio::test]
async fn failing_and_panicking_tools_become_results() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([
        AgentReply::with_calls(
            "",
            vec![
                call("c1", "flaky", json!({})),
                call("c2", "boom", json!({})),
                call("c3", "no_such_tool", json!({})),
            ],
        ),
        AgentReply::text("recovered"),
    ]);
    let orch = h.orchestrator(0, 5);
    let outcome = orch.run_turn("s", "try").await.unwrap();
    assert_eq!(outcome.answer, "recovered");

    let results = tool_results(&h.state("s").await);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].1, "Error: tool 'flaky' failed: disk on fire");
    assert_eq!(results[1].1, "Error: tool 'boom' failed: tool panicked");
    assert!(results[2].1.contains("unknown tool 'no_such_tool'"));
}

#[tokio::test]
async fn parallel_results_are_matched_by_call_id() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([
        AgentReply::with_calls(
            "",
            vec![
                call("slow", "sleepy", json!({"delay_ms": 80, "label": "first"})),
                call("fast", "sleepy", json!({"delay_ms": 0, "label": "second"})),
            ],
        ),
        AgentReply::text("both back"),
    ]);
    let orch = h.orchestrator(0, 5);
    orch.run_turn("s", "go").await.unwrap();

    let state = h.state("s").await;
    assert_eq!(
        tool_results(&state),
        vec![
            ("slow".to_string(), "label=first".to_string()),
            ("fast".to_string(), "label=second".to_string()),
        ]
    );
    // 下一次 Agent 调用前两个结果都已写回
    let second = &h.llm.calls()[1].request.messages;
    assert_eq!(second.iter().filter(|m| m.is_tool_result()).count(), 2);
}

#[tokio::test]
async fn llm_error_leaves_stored_state_untouched() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([AgentReply::text("hello")]);
    let orch = h.orchestrator(0, 5);
    orch.run_turn("s", "hi").await.unwrap();
    let before = h.state("s").await;

    h.script([AgentReply::with_calls("", vec![call("c1", "sleepy", json!({}))])]);
    h.llm.push_error(LlmError::Api {
        status: 500,
        body: "overloaded".into(),
    });
    let err = orch.run_turn("s", "again").await.unwrap_err();
    assert!(matches!(err, AgentError::Llm(_)));
    assert!(err.is_llm());
    assert_eq!(h.state("s").await, before);

    // 首轮失败：不创建会话
    h.llm.push_error(LlmError::Unavailable("down".into()));
    assert!(orch.run_turn("fresh", "hi").await.is_err());
    assert!(orch.session("fresh").await.unwrap().is_none());
}

#[tokio::test]
async fn judge_failure_aborts_turn() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([AgentReply::text("answer")]);
    h.llm.push_error(LlmError::Unavailable("judge down".into()));
    let orch = h.verifying(3);
    assert!(orch.run_turn("s", "q").await.unwrap_err().is_llm());
    assert!(orch.session("s").await.unwrap().is_none());
}

#[tokio::test]
async fn work_tool_updates_context_and_todos() {
    let h = Harness::new(ScriptedOperator::default());
    h.script([
        AgentReply::with_calls(
            "",
            vec![call(
                "c1",
                "work_tool",
                json!({
                    "work_plan": "split the parser",
                    "todo_list": [
                        {"task": "read code", "completed": false},
                        {"task": "write tests", "completed": false},
                        {"task": "read code", "completed": true}
                    ]
                }),
            )],
        ),
        AgentReply::text("planned"),
        AgentReply::with_calls("", vec![call("c2", "work_tool", json!({"memos": "remember CI"}))]),
        AgentReply::text("noted"),
    ]);
    let orch = h.orchestrator(0, 5);
    orch.run_turn("s", "plan").await.unwrap();

    let state = h.state("s").await;
    assert_eq!(state.work_context.work_plan.as_deref(), Some("split the parser"));
    assert_eq!(
        state.todo_list,
        vec![
            TodoItem {
                task: "read code".into(),
                completed: true
            },
            TodoItem::new("write tests"),
        ]
    );

    orch.run_turn("s", "note").await.unwrap();
    let state = h.state("s").await;
    // 未提交的字段保持不变
    assert_eq!(state.work_context.work_plan.as_deref(), Some("split the parser"));
    assert_eq!(state.work_context.memos.as_deref(), Some("remember CI"));
    assert_eq!(state.todo_list.len(), 2);

    // 第二轮的 system prompt 带有工作上下文
    let last_agent_call = h.llm.calls().into_iter().last().unwrap();
    assert!(last_agent_call.request.system.contains("- work_plan: split the parser"));
    assert!(last_agent_call.request.system.contains("[done] read code"));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let h = Harness::new(ScriptedOperator::new(["2"]));
    h.script([
        AgentReply::with_calls("", vec![call("c1", "write_file", json!({}))]),
        AgentReply::text("a done"),
        AgentReply::with_calls("", vec![call("c2", "write_file", json!({}))]),
        AgentReply::text("b done"),
    ]);
    let orch = h.orchestrator(0, 5);
    orch.run_turn("a", "write").await.unwrap();
    orch.run_turn("b", "write").await.unwrap();

    // b 没有继承 a 的放行；第二次询问时回答已耗尽
    assert_eq!(h.operator.prompt_count(), 2);
    assert!(h.state("b").await.always_allowed_tools.is_empty());
    assert_eq!(h.state("a").await.history.len(), 4);
    assert_eq!(h.state("b").await.history.len(), 4);
}

#[tokio::test]
async fn sqlite_store_carries_history_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");

    {
        let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::open(&path).unwrap());
        let h = Harness::with_store(ScriptedOperator::new(["2"]), store);
        h.script([
            AgentReply::with_calls("", vec![call("c1", "write_file", json!({}))]),
            AgentReply::text("saved"),
        ]);
        h.orchestrator(0, 5).run_turn("s", "remember me").await.unwrap();
    }

    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::open(&path).unwrap());
    let h = Harness::with_store(ScriptedOperator::default(), store);
    h.script([
        AgentReply::with_calls("", vec![call("c2", "write_file", json!({}))]),
        AgentReply::text("again"),
    ]);
    h.orchestrator(0, 5).run_turn("s", "write again").await.unwrap();

    // 放行集合随会话持久化：重启后不再询问
    assert_eq!(h.operator.prompt_count(), 0);
    let state = h.state("s").await;
    assert_eq!(state.history[0], Message::user("remember me"));
    assert_eq!(state.history.len(), 8);
}
