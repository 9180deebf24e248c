//! DeepSeek 客户端（OpenAI 兼容格式）
//!
//! DeepSeek 的 `/chat/completions` 与 OpenAI 兼容，支持 function calling。
//! - Base URL: https://api.deepseek.com
//! - deepseek-reasoner 不支持工具调用，Agent 步骤请使用 deepseek-chat

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端
///
/// Key 取自 `DEEPSEEK_API_KEY`（回退 `OPENAI_API_KEY`）；模型未指定时用 `DEEPSEEK_MODEL` 或 deepseek-chat。
pub fn create_deepseek_client(model: Option<&str>, base_url: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
    if model == DEEPSEEK_REASONER {
        tracing::warn!("deepseek-reasoner does not support tool calls; agent steps may fail");
    }

    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        &model,
        api_key.as_deref(),
    )
}
