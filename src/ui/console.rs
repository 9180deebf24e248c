//! 行式控制台前端
//!
//! 每行输入驱动一轮；`exit` 或 EOF 退出。工具确认从同一输入流读取，因此控制台本身就是
//! 交互式 OperatorChannel。启用 show_inner_thoughts 时把 TurnEvent 打印为内部过程。

use std::io;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::{mpsc, Mutex};

use crate::core::{OperatorChannel, Orchestrator, TurnEnding};
use crate::react::TurnEvent;

const BANNER: &str = "Warden agent console. Type a request, or 'exit' to quit.\n";
const EVENT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// 单条过程事件的展示文本
pub fn describe_event(event: &TurnEvent) -> String {
    match event {
        TurnEvent::StepStarted { step } => format!("[step {}]", step),
        TurnEvent::AgentMessage { content } => format!("[thought] {}", content.trim()),
        TurnEvent::ToolCall { tool, args, .. } => format!("[tool] {} {}", tool, args),
        TurnEvent::ApprovalResolved { tool, decision } => {
            format!("[approval] {}: {:?}", tool, decision)
        }
        TurnEvent::ToolResult { id, preview } => format!("[result {}] {}", id, preview),
        TurnEvent::Summarized { removed, kept } => {
            format!("[memory] summarized {} messages, kept {}", removed, kept)
        }
        TurnEvent::SummarizationSkipped { reason } => {
            format!("[memory] summarization skipped: {}", reason)
        }
        TurnEvent::VerificationVerdict { passed: true, .. } => "[verify] pass".to_string(),
        TurnEvent::VerificationVerdict {
            attempt, feedback, ..
        } => format!("[verify] fail (attempt {}): {}", attempt, feedback),
        TurnEvent::Escalated { attempts } => {
            format!("[verify] escalated after {} attempts", attempts)
        }
        TurnEvent::StepLimitReached { max_steps } => {
            format!("[limit] reached {} agent steps", max_steps)
        }
    }
}

pub struct Console<R, W> {
    lines: Mutex<Lines<R>>,
    out: Mutex<W>,
    events: StdMutex<Option<mpsc::UnboundedReceiver<TurnEvent>>>,
    show_inner_thoughts: bool,
}

impl Console<BufReader<Stdin>, Stdout> {
    /// 标准输入输出上的控制台
    pub fn stdio(show_inner_thoughts: bool) -> Self {
        Self::new(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            show_inner_thoughts,
        )
    }
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, show_inner_thoughts: bool) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
            out: Mutex::new(writer),
            events: StdMutex::new(None),
            show_inner_thoughts,
        }
    }

    /// 接收编排器的过程事件
    pub fn attach_events(&self, rx: mpsc::UnboundedReceiver<TurnEvent>) {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(rx);
        }
    }

    /// 下一行输入；EOF 或读取错误返回 None
    async fn read_line(&self) -> Option<String> {
        match self.lines.lock().await.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                None
            }
        }
    }

    async fn write(&self, text: &str) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.flush().await
    }

    /// 打印已到达的过程事件（未开启展示时丢弃）
    async fn flush_events(&self) -> io::Result<()> {
        let pending: Vec<TurnEvent> = match self.events.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(rx) => std::iter::from_fn(|| rx.try_recv().ok()).collect(),
                None => Vec::new(),
            },
            Err(_) => Vec::new(),
        };
        if !self.show_inner_thoughts || pending.is_empty() {
            return Ok(());
        }
        let mut text = String::new();
        for event in &pending {
            text.push_str("  ");
            text.push_str(&describe_event(event));
            text.push('\n');
        }
        self.write(&text).await
    }

    /// REPL 主循环
    pub async fn run(&self, orchestrator: &Orchestrator, session_id: &str) -> io::Result<()> {
        self.write(BANNER).await?;
        loop {
            self.write("\nYou: ").await?;
            let Some(line) = self.read_line().await else {
                self.write("\n").await?;
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if input.eq_ignore_ascii_case("exit") {
                break;
            }

            let turn = orchestrator.run_turn(session_id, input);
            tokio::pin!(turn);
            let mut ticker = tokio::time::interval(EVENT_FLUSH_INTERVAL);
            let result = loop {
                tokio::select! {
                    r = &mut turn => break r,
                    _ = ticker.tick() => self.flush_events().await?,
                }
            };
            self.flush_events().await?;

            match result {
                Ok(outcome) if outcome.ending == TurnEnding::Escalated => {
                    self.write(&format!("AI (needs review): {}\n", outcome.answer)).await?
                }
                Ok(outcome) => self.write(&format!("AI: {}\n", outcome.answer)).await?,
                Err(e) => self.write(&format!("error: {}\n", e)).await?,
            }
        }
        tracing::info!(session_id = %session_id, "console closed");
        Ok(())
    }
}

#[async_trait]
impl<R, W> OperatorChannel for Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn prompt(&self, question: &str) -> Option<String> {
        if let Err(e) = self.flush_events().await {
            tracing::debug!("event flush failed: {}", e);
        }
        if let Err(e) = self.write(question).await {
            tracing::warn!("cannot show confirmation prompt: {}", e);
            return None;
        }
        self.read_line().await
    }
}

#[cfg(test)]
impl<R> Console<R, Vec<u8>> {
    async fn written(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().await).to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::core::{AgentBuilder, ApprovalDecision};
    use crate::llm::{AgentReply, LlmError, ScriptedLlm};
    use crate::memory::ToolCallRequest;
    use serde_json::{json, Map};

    fn console(input: &'static str) -> Console<&'static [u8], Vec<u8>> {
        Console::new(input.as_bytes(), Vec::new(), true)
    }

    #[tokio::test]
    async fn test_prompt_reads_next_line() {
        let c = console("2\n");
        assert_eq!(c.prompt("Choice (1/2/3): ").await.as_deref(), Some("2"));
        assert_eq!(c.prompt("again: ").await, None);
        let out = c.written().await;
        assert!(out.contains("Choice (1/2/3): "));
    }

    #[test]
    fn test_describe_event() {
        assert_eq!(
            describe_event(&TurnEvent::ApprovalResolved {
                tool: "write_file".into(),
                decision: ApprovalDecision::Deny,
            }),
            "[approval] write_file: Deny"
        );
        assert_eq!(
            describe_event(&TurnEvent::VerificationVerdict {
                passed: false,
                attempt: 2,
                feedback: "wrong".into(),
            }),
            "[verify] fail (attempt 2): wrong"
        );
    }

    #[tokio::test]
    async fn test_repl_runs_turns_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = Map::new();
        args.insert("path".into(), json!("a.txt"));
        args.insert("content".into(), json!("x"));
        let llm = Arc::new(ScriptedLlm::new([
            AgentReply::with_calls("", vec![ToolCallRequest::new("c1", "write_file", args)]),
            AgentReply::text("written"),
        ]));
        llm.push_error(LlmError::Unavailable("down".into()));

        // 第二行是工具确认的回答
        let c = Arc::new(console("write it\n1\n\nagain\n Exit \nnever read\n"));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        let orch = AgentBuilder::new(config, dir.path().to_path_buf())
            .with_llm(llm.clone())
            .with_operator(c.clone())
            .with_events(tx)
            .build()
            .unwrap();
        c.attach_events(rx);

        c.run(&orch, "s").await.unwrap();
        let out = c.written().await;
        assert!(out.starts_with("Warden agent console."));
        assert!(out.contains("Tool execution confirmation"));
        assert!(out.contains("[approval] write_file: OnceAllow"));
        assert!(out.contains("AI: written"));
        assert!(out.contains("error: "));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "x");
        assert_eq!(llm.call_count(), 3);
    }
}
