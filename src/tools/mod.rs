//! 工具层：Tool trait 与注册表、调用器（超时 / 错误归一 / 并发）、参数 schema、具体工具

pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod think;
pub mod web;
pub mod work;

pub use executor::{tool_error_text, Invocation, ToolInvoker};
pub use filesystem::{
    file_tools, CreateDirectoryTool, DeleteDirectoryTool, DeleteFileTool, ListDirectoryTool,
    ModifyFileContentTool, MovePathTool, ReadFileTool, ReadManyFilesTool, SafeFs,
    SearchFileContentTool, WriteFileTool,
};
pub use registry::{Tool, ToolRegistry, COMMAND_EXECUTION_TOOL};
pub use schema::{args_schema, parse_args};
pub use shell::RunShellCommandTool;
pub use think::ThinkTool;
pub use web::{InternetSearchTool, WebFetchTool};
pub use work::WorkTool;
