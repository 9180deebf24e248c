//! Warden - 对话式 Agent 编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 单轮状态机、会话状态与归并、工具审批、构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 消息模型、历史摘要压缩、会话持久化
//! - **observability**: tracing 日志初始化
//! - **react**: Agent 步骤 prompt、答案评审、过程事件
//! - **tools**: 工具箱（沙箱文件、Shell、Web、think、work）与调用器
//! - **ui**: 行式控制台

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod ui;
