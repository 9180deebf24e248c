//! Shell 命令执行：run_shell_command
//!
//! 通过 sh -c / cmd /C 在工作区内执行任意命令，带超时与 tracing 审计。
//! 由于副作用无法事先审计，注册表始终把它视为 mutating，每次执行都经过确认（或会话级放行）。
//! 少量明显破坏性的模式（rm -rf /、mkfs、fork bomb 等）直接拒绝。

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::registry::COMMAND_EXECUTION_TOOL;
use crate::tools::schema::{args_schema, parse_args};
use crate::tools::{SafeFs, Tool};

/// 禁止的子串（确认之后也不执行）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod -r 777 /",
    ":(){ :|:& };:", // fork bomb
];

#[derive(Deserialize, JsonSchema)]
struct ShellArgs {
    /// Shell command line to execute
    command: String,
    /// Working directory relative to the workspace root (default: workspace root)
    #[serde(default)]
    cwd: Option<String>,
}

/// Shell 工具：执行命令并报告 stdout / stderr / 退出码
pub struct RunShellCommandTool {
    fs: SafeFs,
    timeout_secs: u64,
}

impl RunShellCommandTool {
    pub fn new(fs: SafeFs, timeout_secs: u64) -> Self {
        Self {
            fs,
            timeout_secs: timeout_secs.max(1),
        }
    }

    fn check_forbidden(command: &str) -> Result<(), String> {
        let lower = command.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if lower.contains(forbidden) {
                return Err(format!("forbidden pattern: {}", forbidden));
            }
        }
        Ok(())
    }
}

fn or_empty(s: &str) -> &str {
    if s.trim().is_empty() {
        "(empty)"
    } else {
        s
    }
}

#[async_trait]
impl Tool for RunShellCommandTool {
    fn name(&self) -> &str {
        COMMAND_EXECUTION_TOOL
    }

    fn description(&self) -> &str {
        "Run a shell command inside the workspace and report stdout, stderr and the exit code. \
         Every execution requires user confirmation unless allowed for the session."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ShellArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ShellArgs = parse_args(args)?;
        let command = args.command.trim();
        if command.is_empty() {
            return Err("empty command".to_string());
        }
        Self::check_forbidden(command)?;

        let cwd = self.fs.resolve(args.cwd.as_deref().unwrap_or("."))?;
        if !cwd.is_dir() {
            return Err(format!(
                "working directory '{}' does not exist",
                args.cwd.as_deref().unwrap_or(".")
            ));
        }
        tracing::info!(command = %command, cwd = %cwd.display(), "run_shell_command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&cwd).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("command timed out after {}s", self.timeout_secs))?
            .map_err(|e| format!("execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);
        let error_line = if output.status.success() {
            "(none)".to_string()
        } else {
            format!("Command exited with non-zero status {}", code)
        };
        Ok(format!(
            "Command: {}\nDirectory: {}\nStdout: {}\nStderr: {}\nExit Code: {}\nError: {}\n",
            command,
            self.fs.display(&cwd),
            or_empty(&stdout),
            or_empty(&stderr),
            code,
            error_line
        ))
    }
}
