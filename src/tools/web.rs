//! Web 工具：web_fetch（抓取 URL 可读文本）与 internet_search（Tavily 搜索 API）
//!
//! GET 请求带超时与 User-Agent；HTML 响应用 html2text 提取可读文本；
//! 结果超过 max_result_chars 时截断并追加 ...[truncated]。
//! allowed_domains 为空表示不限域名。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

fn build_client(timeout_secs: u64) -> Client {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
        .unwrap_or_default()
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(15).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<meta") || s.contains("<head")))
}

/// 从 URL 中提取 host（小写，不含端口）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}

fn truncate_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

#[derive(Deserialize, JsonSchema)]
struct FetchArgs {
    /// Absolute http(s) URL to fetch
    url: String,
}

/// web_fetch：抓取 URL 内容并转为可读文本
pub struct WebFetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

impl WebFetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        Self {
            client: build_client(timeout_secs),
            allowed_domains: allowed_domains.into_iter().map(|s| s.to_lowercase()).collect(),
            max_result_chars,
        }
    }

    fn is_allowed(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url).ok_or_else(|| format!("invalid or unsupported URL: {}", url))?;
        if self.allowed_domains.is_empty() || self.allowed_domains.contains(&domain) {
            return Ok(());
        }
        Err(format!("domain not in allowlist: {}", domain))
    }

    /// 将 HTML 转为可读文本
    fn html_to_text(html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        self.is_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            Self::html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text (HTML is converted to text, long pages are truncated)."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<FetchArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: FetchArgs = parse_args(args)?;
        let url = args.url.trim();
        if url.is_empty() {
            return Err("missing url".to_string());
        }
        tracing::info!(url = %url, "web_fetch");
        self.fetch(url).await
    }
}

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// Search query
    query: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

fn format_results(results: &[TavilyResult]) -> String {
    if results.is_empty() {
        return "No search results found for the query.".to_string();
    }
    let mut lines = Vec::new();
    for (i, r) in results.iter().enumerate() {
        lines.push(format!("Result {}:", i + 1));
        lines.push(format!("  Title: {}", r.title));
        lines.push(format!("  URL: {}", r.url));
        lines.push(format!("  Snippet: {}", r.content.trim()));
        lines.push(String::new());
    }
    lines.join("\n")
}

/// internet_search：调用 Tavily 搜索 API，返回标题 / URL / 摘要
///
/// API key 在每次调用时从环境变量读取；缺失时返回工具错误，不影响启动。
pub struct InternetSearchTool {
    client: Client,
    api_key_env: String,
    max_results: usize,
    max_result_chars: usize,
    endpoint: String,
}

impl InternetSearchTool {
    pub fn new(api_key_env: impl Into<String>, timeout_secs: u64, max_results: usize, max_result_chars: usize) -> Self {
        Self {
            client: build_client(timeout_secs),
            api_key_env: api_key_env.into(),
            max_results: max_results.max(1),
            max_result_chars,
            endpoint: TAVILY_SEARCH_URL.to_string(),
        }
    }

    /// 覆盖搜索端点（自建代理等）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn api_key(&self) -> Result<String, String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| format!("search API key is not set (env {})", self.api_key_env))
    }
}

#[async_trait]
impl Tool for InternetSearchTool {
    fn name(&self) -> &str {
        "internet_search"
    }

    fn description(&self) -> &str {
        "Search the internet and return the top results with title, URL and a snippet. Useful for recent information."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<SearchArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: SearchArgs = parse_args(args)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err("missing query".to_string());
        }
        let api_key = self.api_key()?;
        tracing::info!(query = %query, "internet_search");

        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": self.max_results,
            "include_raw_content": false,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let parsed: TavilyResponse = resp
            .json()
            .await
            .map_err(|e| format!("invalid search response: {}", e))?;
        Ok(truncate_chars(format_results(&parsed.results), self.max_result_chars))
    }
}
