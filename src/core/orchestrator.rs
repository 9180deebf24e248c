//! 编排器：单轮状态机
//!
//! 阶段：Agent → ToolExecution → Agent … → (Verification →) Terminal。
//! - Agent：绑定全部工具 schema 调用模型，追加 Agent 消息，然后尝试摘要压缩历史；
//! - 最新消息带工具调用 → ToolExecution：审批、执行（可并发），结果按 call id 对齐后全部写回，回到 Agent；
//! - 无工具调用：未启用校验 → Terminal；启用 → Verification；
//! - Verification：通过 → Terminal；未通过且未耗尽 → 反馈消息回到 Agent；耗尽 → 升级消息 → Terminal。
//!
//! 每个 session 同一时刻只跑一轮（按 id 加锁）；轮内在状态副本上工作，到达 Terminal 后整体写回一次。
//! 模型调用失败中止本轮，存储中的会话状态保持轮前原样。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::core::{
    AgentError, ApprovalGate, SessionPatch, SessionState, TurnPhase,
};
use crate::memory::{Compaction, HistoryManager, Message, SessionStore};
use crate::react::{preview, Planner, TurnEvent, Verifier};
use crate::tools::{tool_error_text, ToolInvoker, ToolRegistry};

/// 单轮默认最多 Agent 步数
pub const DEFAULT_MAX_STEPS: usize = 25;

const EVENT_PREVIEW_CHARS: usize = 200;

/// 本轮如何结束
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnEnding {
    /// 模型给出无工具调用的回复（未启用校验）
    Answered,
    /// 回复通过校验
    Verified,
    /// 校验重试耗尽，升级给用户
    Escalated,
    /// 达到单轮步数上限
    StepLimit,
}

/// 一轮的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub answer: String,
    pub ending: TurnEnding,
    /// 本轮执行的 Agent 步数
    pub steps: usize,
}

pub struct Orchestrator {
    planner: Planner,
    history: HistoryManager,
    gate: ApprovalGate,
    invoker: ToolInvoker,
    verifier: Option<Verifier>,
    store: Arc<dyn SessionStore>,
    max_steps: usize,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        history: HistoryManager,
        gate: ApprovalGate,
        invoker: ToolInvoker,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            planner,
            history,
            gate,
            invoker,
            verifier: None,
            store,
            max_steps: DEFAULT_MAX_STEPS,
            events: None,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 启用答案校验
    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// 单轮 Agent 步数上限（至少 1）
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// 订阅过程事件
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.invoker.registry()
    }

    /// LLM 累计 token 使用（prompt, completion, total）
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.planner.token_usage()
    }

    pub fn verification_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// 读取已持久化的会话状态
    pub async fn session(&self, session_id: &str) -> Result<Option<SessionState>, AgentError> {
        Ok(self.store.get(session_id).await?)
    }

    /// 以一条用户输入驱动一整轮
    pub async fn run_turn(&self, session_id: &str, input: &str) -> Result<TurnOutcome, AgentError> {
        let lock = self.session_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_turn_locked(session_id, input).await
        };
        drop(lock);
        self.release_session_lock(session_id).await;
        result
    }

    async fn run_turn_locked(&self, session_id: &str, input: &str) -> Result<TurnOutcome, AgentError> {
        let mut state = match self.store.get(session_id).await? {
            Some(state) => state,
            None => {
                tracing::info!(session_id = %session_id, "new session");
                SessionState::new(session_id)
            }
        };
        state.input = input.to_string();
        state.push_message(Message::user(input));

        let outcome = match self.drive(&mut state).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "turn aborted, session state left unchanged");
                return Err(e);
            }
        };
        self.store.put(session_id, &state).await?;
        tracing::info!(
            session_id = %session_id,
            steps = outcome.steps,
            ending = ?outcome.ending,
            history_len = state.history.len(),
            "turn finished"
        );
        Ok(outcome)
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// 没有其他轮次持有或等待时移除会话锁，锁表只包含活跃会话
    async fn release_session_lock(&self, session_id: &str) {
        let mut locks = self.session_locks.lock().await;
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 状态机主循环
    async fn drive(&self, state: &mut SessionState) -> Result<TurnOutcome, AgentError> {
        let specs = self.registry().tool_specs();
        let mut phase = TurnPhase::Agent;
        let mut ending = TurnEnding::Answered;
        let mut steps = 0usize;
        // 本轮模型最近一次给出的非空文本；校验反馈等合成消息不算
        let mut last_reply = String::new();

        loop {
            tracing::debug!(session_id = %state.session_id, phase = ?phase, step = steps, "phase");
            phase = match phase {
                TurnPhase::Agent => {
                    if steps >= self.max_steps {
                        return Ok(self.stop_at_step_limit(state, steps, &last_reply));
                    }
                    steps += 1;
                    self.emit(TurnEvent::StepStarted { step: steps });

                    let reply = self.planner.step(state, self.registry(), &specs).await?;
                    if !reply.content.trim().is_empty() {
                        last_reply = reply.content.trim().to_string();
                        self.emit(TurnEvent::AgentMessage {
                            content: reply.content.clone(),
                        });
                    }
                    for call in &reply.tool_calls {
                        self.emit(TurnEvent::ToolCall {
                            id: call.id.clone(),
                            tool: call.name.clone(),
                            args: call.args_value(),
                        });
                    }
                    state.push_message(reply.into_message());
                    self.compact(state).await;
                    self.route_after_agent(state)
                }
                TurnPhase::ToolExecution => {
                    self.execute_tools(state).await;
                    TurnPhase::Agent
                }
                TurnPhase::Verification => match self.verify(state, &last_reply).await? {
                    Some(end) => {
                        ending = end;
                        TurnPhase::Terminal
                    }
                    None => TurnPhase::Agent,
                },
                TurnPhase::Terminal => {
                    let answer = state.last_agent_content().unwrap_or("").to_string();
                    return Ok(TurnOutcome {
                        answer,
                        ending,
                        steps,
                    });
                }
            };
        }
    }

    /// 只看最新一条消息决定去向
    fn route_after_agent(&self, state: &SessionState) -> TurnPhase {
        match state.history.last() {
            Some(last) if last.has_tool_calls() => TurnPhase::ToolExecution,
            _ if self.verifier.is_some() => TurnPhase::Verification,
            _ => TurnPhase::Terminal,
        }
    }

    async fn compact(&self, state: &mut SessionState) {
        match self.history.maybe_summarize(&mut state.history).await {
            Compaction::Unchanged => {}
            Compaction::Summarized { removed, kept } => {
                self.emit(TurnEvent::Summarized { removed, kept });
            }
            Compaction::Skipped(reason) => {
                self.emit(TurnEvent::SummarizationSkipped { reason });
            }
        }
    }

    /// 审批并执行最新 Agent 消息中的全部工具调用；每个调用恰好得到一条 ToolResult
    async fn execute_tools(&self, state: &mut SessionState) {
        let calls = state
            .history
            .last()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();
        if calls.is_empty() {
            return;
        }

        let review = self
            .gate
            .review(self.registry(), &calls, &state.always_allowed_tools)
            .await;
        for (call, decision) in calls.iter().zip(&review.decisions) {
            self.emit(TurnEvent::ApprovalResolved {
                tool: call.name.clone(),
                decision: *decision,
            });
        }
        for name in review.granted(&state.always_allowed_tools) {
            tracing::info!(session_id = %state.session_id, tool = %name, "tool always allowed for session");
        }

        let invocations = self.invoker.invoke_all(&review.approved).await;

        // 按 call id 对齐：执行结果与拒绝结果合并后按请求顺序写回
        let mut pending: Vec<(String, Message, Option<SessionPatch>)> = invocations
            .into_iter()
            .map(|inv| (inv.call_id, inv.result, inv.patch))
            .collect();
        pending.extend(review.refused.iter().filter_map(|m| match m {
            Message::ToolResult { tool_call_id, .. } => Some((tool_call_id.clone(), m.clone(), None)),
            _ => None,
        }));

        let mut patch = SessionPatch {
            always_allowed_tools: review.always_allowed.clone(),
            ..SessionPatch::default()
        };
        let mut tool_patches = Vec::new();
        for call in &calls {
            let result = match pending.iter().position(|(id, _, _)| *id == call.id) {
                Some(idx) => {
                    let (_, result, tool_patch) = pending.remove(idx);
                    if let Some(p) = tool_patch {
                        tool_patches.push(p);
                    }
                    result
                }
                None => Message::tool_result(
                    call.id.clone(),
                    tool_error_text(&call.name, "no result was produced"),
                ),
            };
            self.emit(TurnEvent::ToolResult {
                id: call.id.clone(),
                preview: preview(result.content(), EVENT_PREVIEW_CHARS),
            });
            patch.history.push(result);
        }
        for p in tool_patches {
            patch.merge(p);
        }
        state.apply(patch);
    }

    /// 校验当前答案；返回 Some(结束方式) 表示进入 Terminal，None 表示带反馈回到 Agent
    async fn verify(
        &self,
        state: &mut SessionState,
        last_answer: &str,
    ) -> Result<Option<TurnEnding>, AgentError> {
        let Some(verifier) = &self.verifier else {
            return Ok(Some(TurnEnding::Answered));
        };
        let agent_prompt = self.planner.system_prompt(state, self.registry());
        let verdict = verifier.judge(&agent_prompt, state).await?;

        if verdict.passed {
            state.verification_attempts = 0;
            self.emit(TurnEvent::VerificationVerdict {
                passed: true,
                attempt: 0,
                feedback: String::new(),
            });
            return Ok(Some(TurnEnding::Verified));
        }

        state.verification_attempts += 1;
        let attempt = state.verification_attempts;
        tracing::info!(
            session_id = %state.session_id,
            attempt,
            max_attempts = verifier.max_attempts(),
            "verification failed"
        );
        self.emit(TurnEvent::VerificationVerdict {
            passed: false,
            attempt,
            feedback: verdict.feedback.clone(),
        });

        if attempt < verifier.max_attempts() {
            state.push_message(verifier.feedback_message(&verdict.feedback, attempt));
            return Ok(None);
        }

        state.push_message(verifier.escalation_message(last_answer, &verdict.feedback, attempt));
        state.verification_attempts = 0;
        tracing::warn!(session_id = %state.session_id, attempts = attempt, "verification retries exhausted, escalating");
        self.emit(TurnEvent::Escalated { attempts: attempt });
        Ok(Some(TurnEnding::Escalated))
    }

    fn stop_at_step_limit(&self, state: &mut SessionState, steps: usize, last: &str) -> TurnOutcome {
        let mut text = format!(
            "Stopped after reaching the limit of {} agent steps for this turn.",
            self.max_steps
        );
        if !last.is_empty() {
            text.push_str("\nLast agent output:\n");
            text.push_str(last);
        }
        state.verification_attempts = 0;
        state.push_message(Message::agent(text.clone()));
        tracing::warn!(session_id = %state.session_id, max_steps = self.max_steps, "step limit reached");
        self.emit(TurnEvent::StepLimitReached {
            max_steps: self.max_steps,
        });
        TurnOutcome {
            answer: text,
            ending: TurnEnding::StepLimit,
            steps,
        }
    }
}
