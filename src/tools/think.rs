//! think_tool：让模型把一次反思写进历史，便于后续步骤引用；无副作用

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

#[derive(Deserialize, JsonSchema)]
struct ThinkArgs {
    /// Reflection on progress, gaps, and the next decision
    reflection: String,
}

pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think_tool"
    }

    fn description(&self) -> &str {
        "Record a strategic reflection on progress and decisions before acting. Does not change anything."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ThinkArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ThinkArgs = parse_args(args)?;
        if args.reflection.trim().is_empty() {
            return Err("reflection must not be empty".to_string());
        }
        Ok(format!("Reflection recorded: {}", args.reflection.trim()))
    }
}
