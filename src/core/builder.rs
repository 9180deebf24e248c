//! Agent 构建器：按配置组装 Orchestrator
//!
//! 统一 LLM 选择、工具注册、审批通道、会话存储与校验器的初始化，控制台与测试共用同一套逻辑。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{
    AgentError, ApprovalGate, NonInteractiveOperator, OperatorChannel, Orchestrator,
};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{HistoryManager, InMemorySessionStore, SessionStore, SqliteSessionStore};
use crate::react::{Planner, TurnEvent, Verifier, DEFAULT_BASE_PROMPT};
use crate::tools::{
    file_tools, InternetSearchTool, RunShellCommandTool, SafeFs, ThinkTool, ToolInvoker,
    ToolRegistry, WebFetchTool, WorkTool,
};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// 按配置创建 LLM 客户端；model 覆盖配置中的模型（用于评审模型）
///
/// provider = mock 或找不到 API Key 时回退 Mock 并告警。
pub fn create_llm_from_config(cfg: &AppConfig, model: Option<&str>) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let model = model.or(cfg.llm.model.as_deref());
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        "deepseek" if has_deepseek_key || has_openai_key => {
            let client = create_deepseek_client(model, cfg.llm.base_url.as_deref())
                .with_timeout(cfg.llm.timeouts.request)
                .with_temperature(cfg.llm.temperature);
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Arc::new(client)
        }
        "openai" if has_openai_key => {
            let model = model.unwrap_or(DEFAULT_OPENAI_MODEL);
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(
                OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    model,
                    std::env::var("OPENAI_API_KEY").ok().as_deref(),
                )
                .with_timeout(cfg.llm.timeouts.request)
                .with_temperature(cfg.llm.temperature),
            )
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// Agent 构建器：统一配置和初始化编排器的各个组件
pub struct AgentBuilder {
    config: AppConfig,
    workspace: PathBuf,
    system_prompt: String,
    llm: Option<Arc<dyn LlmClient>>,
    judge_llm: Option<Arc<dyn LlmClient>>,
    operator: Option<Arc<dyn OperatorChannel>>,
    store: Option<Arc<dyn SessionStore>>,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            system_prompt: DEFAULT_BASE_PROMPT.to_string(),
            llm: None,
            judge_llm: None,
            operator: None,
            store: None,
            events: None,
        }
    }

    /// 设置基础系统提示词（角色说明）
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 从 config/prompts/system.md 加载基础系统提示词，找不到时保留默认
    pub fn with_system_prompt_from_file(mut self) -> Self {
        if let Some(prompt) = ["config/prompts/system.md", "../config/prompts/system.md"]
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
            .filter(|p| !p.trim().is_empty())
        {
            self.system_prompt = prompt;
        }
        self
    }

    /// 指定 Agent 使用的模型（不指定时按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定评审使用的模型（不指定时按 llm.judge_model 创建，或复用 Agent 模型）
    pub fn with_judge_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.judge_llm = Some(llm);
        self
    }

    /// 交互式确认通道（如控制台）
    pub fn with_operator(mut self, operator: Arc<dyn OperatorChannel>) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 构建工具注册表：沙箱文件工具、Shell、Web、think、work
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        let fs = SafeFs::new(&self.workspace);
        for tool in file_tools(&fs) {
            tools.register_arc(tool);
        }
        tools.register(RunShellCommandTool::new(
            fs,
            self.config.tools.shell.timeout_secs,
        ));

        let web = &self.config.tools.web;
        tools.register(WebFetchTool::new(
            web.allowed_domains.clone(),
            web.timeout_secs,
            web.max_result_chars,
        ));
        tools.register(InternetSearchTool::new(
            web.search_api_key_env.clone(),
            web.timeout_secs,
            web.search_max_results,
            web.max_result_chars,
        ));
        tools.register(ThinkTool);
        tools.register(WorkTool);
        tools
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => create_llm_from_config(&self.config, None),
        }
    }

    fn build_judge_llm(&self, agent_llm: &Arc<dyn LlmClient>) -> Arc<dyn LlmClient> {
        if let Some(llm) = &self.judge_llm {
            return Arc::clone(llm);
        }
        match self.config.llm.judge_model.as_deref() {
            Some(model) if self.llm.is_none() => create_llm_from_config(&self.config, Some(model)),
            _ => Arc::clone(agent_llm),
        }
    }

    /// approval.interactive = false 时一律使用非交互通道
    pub fn build_operator(&self) -> Arc<dyn OperatorChannel> {
        match &self.operator {
            Some(op) if self.config.approval.interactive => Arc::clone(op),
            Some(_) => {
                tracing::info!("approval.interactive = false, confirmations resolve as unavailable");
                Arc::new(NonInteractiveOperator)
            }
            None => Arc::new(NonInteractiveOperator),
        }
    }

    /// session.store：memory / sqlite
    pub fn build_store(&self) -> Result<Arc<dyn SessionStore>, AgentError> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        match self.config.session.store.to_lowercase().as_str() {
            "memory" => Ok(Arc::new(InMemorySessionStore::new())),
            "sqlite" => {
                let path = &self.config.session.sqlite_path;
                tracing::info!(path = %path.display(), "Using SQLite session store");
                Ok(Arc::new(SqliteSessionStore::open(path)?))
            }
            other => Err(AgentError::Config(format!(
                "unknown session store '{}' (expected memory or sqlite)",
                other
            ))),
        }
    }

    /// 组装编排器
    pub fn build(self) -> Result<Orchestrator, AgentError> {
        std::fs::create_dir_all(&self.workspace).map_err(|e| {
            AgentError::Config(format!(
                "cannot create workspace {}: {}",
                self.workspace.display(),
                e
            ))
        })?;

        let llm = self.build_llm();
        let registry = Arc::new(self.build_tool_registry());
        tracing::info!(tools = registry.len(), workspace = %self.workspace.display(), "tools registered");

        let history = HistoryManager::new(
            Arc::clone(&llm),
            self.config.history.max_conversation_turns,
            self.config.history.summary_conversation_turns,
        );
        let mut orchestrator = Orchestrator::new(
            Planner::new(Arc::clone(&llm), self.system_prompt.clone()),
            history,
            ApprovalGate::new(self.build_operator()),
            ToolInvoker::new(registry, self.config.tools.tool_timeout_secs),
            self.build_store()?,
        )
        .with_max_steps(self.config.agent.max_steps);

        if self.config.verification.enabled {
            let judge = self.build_judge_llm(&llm);
            orchestrator =
                orchestrator.with_verifier(Verifier::from_config(judge, &self.config.verification));
        }
        if let Some(tx) = self.events {
            orchestrator = orchestrator.with_events(tx);
        }
        Ok(orchestrator)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

/// 便捷函数：加载配置并创建 AgentBuilder（配置加载失败时使用默认值）
pub fn create_agent_builder(config_path: Option<PathBuf>) -> AgentBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    AgentBuilder::from_config(config)
}

impl AgentBuilder {
    /// 工作目录：配置 > 当前目录下的 workspace；并尝试加载 prompt 文件
    pub fn from_config(config: AppConfig) -> Self {
        let workspace = config
            .app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"));
        if let Err(e) = std::fs::create_dir_all(&workspace) {
            tracing::warn!(workspace = %workspace.display(), "cannot create workspace: {}", e);
        }
        let workspace = workspace.canonicalize().unwrap_or(workspace);

        AgentBuilder::new(config, workspace).with_system_prompt_from_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScriptedOperator;
    use crate::llm::{AgentReply, ScriptedLlm};

    fn mock_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config
    }

    #[test]
    fn test_registry_has_all_tools() {
        let dir = tempfile::tempdir().unwrap();
        let builder = AgentBuilder::new(mock_config(), dir.path().to_path_buf());
        let names = builder.build_tool_registry().tool_names();
        for expected in [
            "list_directory_contents",
            "read_file",
            "read_many_files",
            "search_file_content",
            "write_file",
            "delete_file",
            "create_directory",
            "delete_directory",
            "move_path",
            "modify_file_content",
            "run_shell_command",
            "web_fetch",
            "internet_search",
            "think_tool",
            "work_tool",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_non_interactive_overrides_operator() {
        let mut config = mock_config();
        config.approval.interactive = false;
        let builder = AgentBuilder::new(config, PathBuf::from("unused"))
            .with_operator(Arc::new(ScriptedOperator::new(["2"])));
        // 非交互：即使给了脚本通道也不应被使用
        let op = builder.build_operator();
        assert_eq!(op.prompt("q?").await, None);
    }

    #[test]
    fn test_unknown_store_is_config_error() {
        let mut config = mock_config();
        config.session.store = "redis".into();
        let builder = AgentBuilder::new(config, PathBuf::from("unused"));
        assert!(matches!(builder.build_store(), Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_runs_a_turn_with_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = mock_config();
        config.session.store = "sqlite".into();
        config.session.sqlite_path = dir.path().join("db/sessions.db");
        config.verification.enabled = true;

        let llm = Arc::new(ScriptedLlm::new([
            AgentReply::text("answer"),
            AgentReply::text("VERDICT: PASS"),
        ]));
        let orch = AgentBuilder::new(config, dir.path().join("ws"))
            .with_llm(llm.clone())
            .build()
            .unwrap();
        assert!(orch.verification_enabled());

        let outcome = orch.run_turn("s", "hi").await.unwrap();
        assert_eq!(outcome.answer, "answer");
        assert_eq!(llm.call_count(), 2);
        assert!(dir.path().join("ws").is_dir());
        assert!(dir.path().join("db/sessions.db").exists());
    }
}
