//! 可观测性：tracing 日志初始化
//!
//! 控制台层写 stderr（默认 info，RUST_LOG 覆盖）；启用文件日志时每次运行写一个
//! `<log_dir>/<YYYY-MM-DD_HH-MM-SS>_<uuid 前 8 位>.log`，级别 debug。

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::config::LoggingSection;

/// 本次运行的日志文件路径
pub fn log_file_path(config: &LoggingSection) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    config
        .log_dir
        .join(format!("{}_{}.log", stamp, id.get(..8).unwrap_or(&id)))
}

fn open_log_file(config: &LoggingSection) -> Option<(PathBuf, File)> {
    if !config.file_enabled {
        return None;
    }
    let path = log_file_path(config);
    let opened = std::fs::create_dir_all(&config.log_dir).and_then(|_| File::create(&path));
    match opened {
        Ok(file) => Some((path, file)),
        Err(e) => {
            // subscriber 尚未安装，只能直接写 stderr
            eprintln!("warning: cannot open log file {}: {}", path.display(), e);
            None
        }
    }
}

/// 安装全局 subscriber；返回日志文件路径（未启用或创建失败时为 None）
pub fn init(config: &LoggingSection) -> Option<PathBuf> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file = open_log_file(config);
    let path = file.as_ref().map(|(p, _)| p.clone());
    let file_layer = file.map(|(_, f)| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(f))
            .with_filter(LevelFilter::DEBUG)
    });

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
    if let Some(p) = &path {
        tracing::debug!(path = %p.display(), "file logging enabled");
    }
    path
}
