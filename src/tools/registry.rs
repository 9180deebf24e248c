//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / mutating / execute），
//! 由 ToolRegistry 按名注册与查找。mutating 决定 ApprovalGate 是否需要人工确认；
//! 命令执行工具（`run_shell_command`）不论自身声明如何，一律视为 mutating。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::SessionPatch;
use crate::llm::ToolSpec;

/// 任意命令执行能力：执行前无法审计其副作用，始终需要确认
pub const COMMAND_EXECUTION_TOOL: &str = "run_shell_command";

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、副作用标记、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（LLM tool call 中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 是否有副作用（写文件、执行命令等）；默认按有副作用处理
    fn mutating(&self) -> bool {
        true
    }

    /// 执行成功后要合并进会话状态的增量（如 work_tool 更新工作上下文）
    fn session_patch(&self, _args: &Value) -> Option<SessionPatch> {
        None
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 有效的 mutating 分类；未注册返回 None
    pub fn is_mutating(&self, name: &str) -> Option<bool> {
        let tool = self.tools.get(name)?;
        Some(name == COMMAND_EXECUTION_TOOL || tool.mutating())
    }

    /// 按名称排序的工具名
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表（按名称排序），用于 prompt 中的工具段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                let description = self.tools.get(&name)?.description().to_string();
                Some((name, description))
            })
            .collect()
    }

    /// 绑定给 LLM 的完整工具 schema
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                let tool = self.tools.get(&name)?;
                Some(ToolSpec {
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                    name,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        name: &'static str,
        mutating: bool,
    }

    #[async_trait]
    impl Tool for Probe {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "probe"
        }
        fn mutating(&self) -> bool {
            self.mutating
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_mutating_classification() {
        let mut registry = ToolRegistry::new();
        registry.register(Probe {
            name: "read_file",
            mutating: false,
        });
        registry.register(Probe {
            name: "write_file",
            mutating: true,
        });
        registry.register(Probe {
            name: COMMAND_EXECUTION_TOOL,
            mutating: false,
        });

        assert_eq!(registry.is_mutating("read_file"), Some(false));
        assert_eq!(registry.is_mutating("write_file"), Some(true));
        assert_eq!(registry.is_mutating(COMMAND_EXECUTION_TOOL), Some(true));
        assert_eq!(registry.is_mutating("missing"), None);
    }

    #[test]
    fn test_specs_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Probe {
            name: "b",
            mutating: true,
        });
        registry.register(Probe {
            name: "a",
            mutating: true,
        });
        let names: Vec<String> = registry.tool_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.tool_descriptions()[0], ("a".to_string(), "probe".to_string()));
    }
}
