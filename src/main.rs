//! Warden 命令行入口
//!
//! 初始化日志、按配置组装编排器，并在标准输入输出上运行控制台主循环。
//! 用法：`warden [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use warden::config::{load_config, AppConfig};
use warden::core::AgentBuilder;
use warden::{observability, ui::Console};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (config, config_error) = match load_config(config_path) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    if let Some(path) = observability::init(&config.logging) {
        tracing::info!(path = %path.display(), "logging to file");
    }
    if let Some(e) = config_error {
        tracing::warn!("Config load failed ({}), using defaults", e);
    }

    let session_id = config.app.session_id.clone();
    let console = Arc::new(Console::stdio(config.app.show_inner_thoughts));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let orchestrator = AgentBuilder::from_config(config)
        .with_operator(console.clone())
        .with_events(event_tx)
        .build()
        .context("Failed to create agent")?;
    console.attach_events(event_rx);

    console
        .run(&orchestrator, &session_id)
        .await
        .context("Console run failed")?;

    let (prompt, completion, total) = orchestrator.token_usage();
    tracing::info!(prompt, completion, total, "session token usage");
    Ok(())
}
