//! OpenAI 兼容 API 客户端
//!
//! 直接以 JSON 调用任意 OpenAI 兼容的 `/chat/completions` 端点（可配置 base_url），
//! 支持 function calling：请求带 tools，响应中的 tool_calls 解析为 ToolCallRequest。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::llm::{AgentReply, ChatRequest, LlmClient, LlmError, ToolSpec};
use crate::memory::{Message, ToolCallRequest};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 HTTP Client、端点、模型名与温度
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        Self {
            http: Client::new(),
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
            temperature: 0.0,
            usage: TokenUsage::default(),
        }
    }

    /// 设置单次请求超时
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 构造请求体；tools 为 None 或空时不绑定工具
    fn request_body(&self, request: &ChatRequest, tools: Option<&[ToolSpec]>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire_messages(request),
            "temperature": self.temperature,
        });
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            let wire: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(wire);
        }
        body
    }
}

/// 消息转为 chat/completions 的 messages 数组
fn to_wire_messages(request: &ChatRequest) -> Vec<Value> {
    let mut out = Vec::with_capacity(request.messages.len() + 1);
    if !request.system.is_empty() {
        out.push(json!({ "role": "system", "content": request.system }));
    }
    for m in &request.messages {
        let wire = match m {
            Message::User { text } => json!({ "role": "user", "content": text }),
            Message::Agent {
                content,
                tool_calls,
            } if !tool_calls.is_empty() => {
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.args_value().to_string(),
                            }
                        })
                    })
                    .collect();
                let content = if content.is_empty() {
                    Value::Null
                } else {
                    Value::String(content.clone())
                };
                json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": calls,
                })
            }
            Message::Agent { content, .. } => json!({ "role": "assistant", "content": content }),
            Message::ToolResult {
                tool_call_id,
                content,
            } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
            Message::Summary { content } => json!({
                "role": "assistant",
                "content": format!("Conversation summary: {}", content),
            }),
        };
        out.push(wire);
    }
    out
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// arguments 是 JSON 字符串；解析失败时以空参数继续，由工具自身报告缺参
fn parse_arguments(tool: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(tool = %tool, args = %other, "tool arguments are not an object");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(tool = %tool, error = %e, "tool arguments are not valid JSON");
            Map::new()
        }
    }
}

fn parse_response(response: ChatResponse) -> Result<AgentReply, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            let id = if c.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                c.id
            };
            let args = parse_arguments(&c.function.name, &c.function.arguments);
            ToolCallRequest::new(id, c.function.name, args)
        })
        .collect();

    Ok(AgentReply {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn generate(
        &self,
        request: &ChatRequest,
        tools: Option<&[ToolSpec]>,
    ) -> Result<AgentReply, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(request, tools);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        tracing::debug!(model = %self.model, "chat completion received");

        parse_response(parsed)
    }
}
