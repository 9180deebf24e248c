//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WARDEN__*` 覆盖（双下划线表示嵌套，如 `WARDEN__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub history: HistorySection,
    pub verification: VerificationSection,
    pub agent: AgentSection,
    pub approval: ApprovalSection,
    pub tools: ToolsSection,
    pub session: SessionSection,
    pub logging: LoggingSection,
}

/// [app] 段：应用名、工作目录、会话 ID、是否展示内部过程
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "default_true")]
    pub show_inner_thoughts: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            session_id: default_session_id(),
            show_inner_thoughts: true,
        }
    }
}

fn default_session_id() -> String {
    "main_chat_session".to_string()
}

fn default_true() -> bool {
    true
}

/// [llm] 段：后端选择、模型、温度与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；没有 API Key 时回退 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    /// 评审使用的模型，未设置时与 Agent 相同
    pub judge_model: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            temperature: 0.0,
            timeouts: LlmTimeoutsSection::default(),
            judge_model: None,
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [history] 段：超过 max_conversation_turns 条消息时摘要，保留最近 summary_conversation_turns 条
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    /// 0 表示不摘要
    #[serde(default = "default_max_conversation_turns")]
    pub max_conversation_turns: usize,
    #[serde(default = "default_summary_conversation_turns")]
    pub summary_conversation_turns: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_conversation_turns: default_max_conversation_turns(),
            summary_conversation_turns: default_summary_conversation_turns(),
        }
    }
}

fn default_max_conversation_turns() -> usize {
    10
}

fn default_summary_conversation_turns() -> usize {
    5
}

/// [verification] 段：最终答案评审
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationSection {
    #[serde(default)]
    pub enabled: bool,
    /// 1–100，越高越严
    #[serde(default = "default_strictness")]
    pub strictness: u8,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            strictness: default_strictness(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_strictness() -> u8 {
    70
}

fn default_max_attempts() -> u32 {
    3
}

/// [agent] 段：单轮 Agent 步数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize {
    crate::core::DEFAULT_MAX_STEPS
}

/// [approval] 段：false 时所有确认立即视为不可用（跳过执行）
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalSection {
    #[serde(default = "default_true")]
    pub interactive: bool,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self { interactive: true }
    }
}

/// [tools] 段：工具超时、Shell、Web
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub web: WebSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            shell: ShellSection::default(),
            web: WebSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    60
}

/// [tools.shell] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// [tools.web] 段：抓取超时、最大字符数、搜索 Key 所在环境变量、域名白名单（空表示不限制）
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_web_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_search_api_key_env")]
    pub search_api_key_env: String,
    #[serde(default = "default_search_max_results")]
    pub search_max_results: usize,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_web_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            search_api_key_env: default_search_api_key_env(),
            search_max_results: default_search_max_results(),
            allowed_domains: Vec::new(),
        }
    }
}

fn default_web_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

fn default_search_api_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_search_max_results() -> usize {
    5
}

/// [session] 段：会话存储后端 memory / sqlite
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            store: default_store(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_store() -> String {
    "memory".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("workspace/.warden/sessions.db")
}

/// [logging] 段：是否写每次运行的日志文件
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_true")]
    pub file_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            file_enabled: true,
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// 从 config 目录加载配置，环境变量 WARDEN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WARDEN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WARDEN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let config: AppConfig = c.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    /// 拒绝运行时会被静默改写的取值
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.history.summary_conversation_turns == 0 {
            return Err(config::ConfigError::Message(
                "history.summary_conversation_turns must be at least 1: the newest message \
                 (possibly a pending tool call) is never summarized"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
