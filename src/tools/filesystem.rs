//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 与符号链接逃逸）。
//! 只读：list_directory_contents / read_file / read_many_files / search_file_content；
//! 有副作用：write_file / delete_file / create_directory / delete_directory / move_path / modify_file_content。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

/// search_file_content 最多返回的匹配行数
const MAX_SEARCH_RESULTS: usize = 200;
/// 单个文件超过该大小时跳过内容搜索
const MAX_SEARCH_FILE_SIZE: u64 = 1024 * 1024;

const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules/", ".git/", "target/", "__pycache__/", ".venv/", ".pytest_cache/",
    "*.pyc", "*.log", "*.tmp", "*.zip", "*.tar.gz", "*.rar", "*.7z", "*.exe", "*.dll",
    "*.so", "*.dylib", "*.png", "*.jpg", "*.jpeg", "*.gif", "*.bmp", "*.ico", "*.mp3",
    "*.mp4", "*.avi", "*.mov", "*.pdf", "*.doc", "*.docx", "*.xls", "*.xlsx", "*.ppt",
    "*.pptx", "*.sqlite3", "*.db", ".DS_Store", "Cargo.lock",
];

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析为根下的绝对路径；目标可以不存在（写入、创建时）
    ///
    /// 先做词法归一化（处理 `.` / `..`），再对最深的已存在祖先做 canonicalize，
    /// 两步都必须落在根目录内。
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let trimmed = path.trim();
        let joined = if trimmed.is_empty() || trimmed == "." {
            self.root_dir.clone()
        } else {
            let p = Path::new(trimmed);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.root_dir.join(p)
            }
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root_dir) {
            return Err(format!("path '{}' escapes the workspace", path));
        }

        let mut probe: Option<&Path> = Some(normalized.as_path());
        while let Some(current) = probe {
            if current.exists() {
                let canonical = current
                    .canonicalize()
                    .map_err(|e| format!("cannot resolve '{}': {}", path, e))?;
                if !canonical.starts_with(&self.root_dir) {
                    return Err(format!("path '{}' escapes the workspace", path));
                }
                break;
            }
            probe = current.parent();
        }
        Ok(normalized)
    }

    /// 根目录下的相对显示路径（根本身显示为 "."）
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root_dir) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.display().to_string(),
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(format!("path '{}' not found", path));
        }
        if !resolved.is_file() {
            return Err(format!("path '{}' is not a file", path));
        }
        std::fs::read_to_string(&resolved).map_err(|e| format!("read '{}' failed: {}", path, e))
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = self.resolve(path)?;
        if !base.exists() {
            return Err(format!("path '{}' not found", path));
        }
        if !base.is_dir() {
            return Err(format!("path '{}' is not a directory", path));
        }
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(|e| format!("list '{}' failed: {}", path, e))? {
            let e = e.map_err(|e| e.to_string())?;
            let name = e.file_name().to_string_lossy().to_string();
            let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                "/"
            } else {
                ""
            };
            entries.push(format!("{}{}", name, ty));
        }
        entries.sort();
        Ok(entries)
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn pattern(p: &str) -> Result<glob::Pattern, String> {
    glob::Pattern::new(p).map_err(|e| format!("invalid glob pattern '{}': {}", p, e))
}

/// 路径过滤：以 `/` 结尾的模式匹配任一上级目录名，其余模式匹配相对路径或文件名
struct PathFilter {
    dirs: Vec<glob::Pattern>,
    files: Vec<glob::Pattern>,
}

impl PathFilter {
    fn new<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for p in patterns {
            match p.strip_suffix('/') {
                Some(dir) => dirs.push(pattern(dir)?),
                None => files.push(pattern(p)?),
            }
        }
        Ok(Self { dirs, files })
    }

    fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }

    fn matches(&self, rel: &str) -> bool {
        let mut parts: Vec<&str> = rel.split('/').collect();
        let file_name = parts.pop().unwrap_or("");
        if parts
            .iter()
            .any(|dir| self.dirs.iter().any(|p| p.matches(dir)))
        {
            return true;
        }
        self.files
            .iter()
            .any(|p| p.matches(rel) || p.matches(file_name))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, JsonSchema)]
struct PathArgs {
    /// Path relative to the workspace root
    path: String,
}

#[derive(Deserialize, JsonSchema)]
struct WriteFileArgs {
    /// File path relative to the workspace root; the parent directory must exist
    path: String,
    /// Full file content (overwrites an existing file)
    content: String,
}

#[derive(Deserialize, JsonSchema)]
struct MoveArgs {
    /// Existing file or directory
    source_path: String,
    /// New location
    destination_path: String,
}

#[derive(Deserialize, JsonSchema)]
struct ModifyArgs {
    /// File to modify
    path: String,
    /// Exact text to replace (every occurrence)
    old_text: String,
    /// Replacement text
    new_text: String,
}

#[derive(Deserialize, JsonSchema)]
struct ReadManyArgs {
    /// Files, directories or glob patterns relative to the workspace root
    paths: Vec<String>,
    /// Glob patterns to exclude; a trailing '/' matches a directory name
    #[serde(default)]
    exclude: Vec<String>,
    /// If given, only files matching one of these glob patterns are read
    #[serde(default)]
    include: Vec<String>,
    /// Walk directories recursively (default true)
    #[serde(default = "default_true")]
    recursive: bool,
    /// Apply the built-in exclude list: VCS folders, build output, binaries (default true)
    #[serde(default = "default_true")]
    use_default_excludes: bool,
}

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// Regular expression searched line by line
    pattern: String,
    /// Glob filter on file names or relative paths, e.g. '*.rs'
    #[serde(default)]
    include: Option<String>,
    /// Directory to search (default: workspace root)
    #[serde(default)]
    path: Option<String>,
}

/// 列出目录内容
pub struct ListDirectoryTool {
    fs: SafeFs,
}

impl ListDirectoryTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory_contents"
    }

    fn description(&self) -> &str {
        "List the entries of a directory in the workspace. Directories end with '/'."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<PathArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PathArgs = parse_args(args)?;
        tracing::debug!(path = %args.path, "list_directory_contents");
        let entries = self.fs.list_dir(&args.path)?;
        if entries.is_empty() {
            return Ok(format!("Directory '{}' is empty.", args.path));
        }
        let lines: Vec<String> = entries.iter().map(|e| format!("- {}", e)).collect();
        Ok(format!("Contents of '{}':\n{}", args.path, lines.join("\n")))
    }
}

/// 读取单个文本文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<PathArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PathArgs = parse_args(args)?;
        let content = self.fs.read_file(&args.path)?;
        Ok(format!("Content of '{}':\n---\n{}\n---", args.path, content))
    }
}

/// 写入（覆盖）文件
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, overwriting it if it exists. The parent directory must already exist."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<WriteFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: WriteFileArgs = parse_args(args)?;
        let target = self.fs.resolve(&args.path)?;
        if let Some(parent) = target.parent() {
            if !parent.is_dir() {
                return Err(format!(
                    "directory '{}' does not exist; create it first",
                    self.fs.display(parent)
                ));
            }
        }
        if target.is_dir() {
            return Err(format!("path '{}' is a directory", args.path));
        }
        std::fs::write(&target, args.content.as_bytes())
            .map_err(|e| format!("write '{}' failed: {}", args.path, e))?;
        Ok(format!(
            "Wrote {} bytes to '{}'.",
            args.content.len(),
            args.path
        ))
    }
}

/// 删除文件
pub struct DeleteFileTool {
    fs: SafeFs,
}

impl DeleteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file from the workspace."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<PathArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PathArgs = parse_args(args)?;
        let target = self.fs.resolve(&args.path)?;
        if !target.exists() {
            return Err(format!("path '{}' not found", args.path));
        }
        if !target.is_file() {
            return Err(format!("path '{}' is not a file", args.path));
        }
        std::fs::remove_file(&target).map_err(|e| format!("delete '{}' failed: {}", args.path, e))?;
        Ok(format!("Deleted file '{}'.", args.path))
    }
}

/// 创建目录（含中间目录）
pub struct CreateDirectoryTool {
    fs: SafeFs,
}

impl CreateDirectoryTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a new directory, including missing parent directories. Fails if the path exists."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<PathArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PathArgs = parse_args(args)?;
        let target = self.fs.resolve(&args.path)?;
        if target.exists() {
            return Err(format!("path '{}' already exists", args.path));
        }
        std::fs::create_dir_all(&target)
            .map_err(|e| format!("create '{}' failed: {}", args.path, e))?;
        Ok(format!("Created directory '{}'.", args.path))
    }
}

/// 递归删除目录
pub struct DeleteDirectoryTool {
    fs: SafeFs,
}

impl DeleteDirectoryTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for DeleteDirectoryTool {
    fn name(&self) -> &str {
        "delete_directory"
    }

    fn description(&self) -> &str {
        "Delete a directory and everything inside it."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<PathArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PathArgs = parse_args(args)?;
        let target = self.fs.resolve(&args.path)?;
        if target == self.fs.root() {
            return Err("refusing to delete the workspace root".to_string());
        }
        if !target.exists() {
            return Err(format!("path '{}' not found", args.path));
        }
        if !target.is_dir() {
            return Err(format!("path '{}' is not a directory", args.path));
        }
        std::fs::remove_dir_all(&target)
            .map_err(|e| format!("delete '{}' failed: {}", args.path, e))?;
        Ok(format!("Deleted directory '{}'.", args.path))
    }
}

/// 移动或重命名文件 / 目录
pub struct MovePathTool {
    fs: SafeFs,
}

impl MovePathTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for MovePathTool {
    fn name(&self) -> &str {
        "move_path"
    }

    fn description(&self) -> &str {
        "Move or rename a file or directory inside the workspace."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<MoveArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: MoveArgs = parse_args(args)?;
        let source = self.fs.resolve(&args.source_path)?;
        let mut destination = self.fs.resolve(&args.destination_path)?;
        if !source.exists() {
            return Err(format!("source path '{}' not found", args.source_path));
        }
        if source == self.fs.root() {
            return Err("refusing to move the workspace root".to_string());
        }
        if destination.is_dir() {
            if let Some(name) = source.file_name() {
                destination = destination.join(name);
            }
        }
        std::fs::rename(&source, &destination).map_err(|e| {
            format!("move '{}' failed: {}", args.source_path, e)
        })?;
        Ok(format!(
            "Moved '{}' to '{}'.",
            args.source_path,
            self.fs.display(&destination)
        ))
    }
}

/// 文本替换（全部出现处）
pub struct ModifyFileContentTool {
    fs: SafeFs,
}

impl ModifyFileContentTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ModifyFileContentTool {
    fn name(&self) -> &str {
        "modify_file_content"
    }

    fn description(&self) -> &str {
        "Replace every occurrence of old_text with new_text in a file and write it back."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ModifyArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ModifyArgs = parse_args(args)?;
        if args.old_text.is_empty() {
            return Err("old_text must not be empty".to_string());
        }
        let content = self.fs.read_file(&args.path)?;
        let count = content.matches(args.old_text.as_str()).count();
        if count == 0 {
            return Ok(format!(
                "No occurrence of '{}' found in '{}'; file unchanged.",
                args.old_text, args.path
            ));
        }
        let modified = content.replace(args.old_text.as_str(), &args.new_text);
        let target = self.fs.resolve(&args.path)?;
        std::fs::write(&target, modified)
            .map_err(|e| format!("write '{}' failed: {}", args.path, e))?;
        Ok(format!(
            "Modified '{}': replaced {} occurrence(s) of '{}' with '{}'.",
            args.path, count, args.old_text, args.new_text
        ))
    }
}

/// 批量读取文件：支持目录、glob 模式、include / exclude 过滤
pub struct ReadManyFilesTool {
    fs: SafeFs,
}

impl ReadManyFilesTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    fn collect(&self, args: &ReadManyArgs) -> Result<Vec<PathBuf>, String> {
        let mut files = Vec::new();
        for p in &args.paths {
            let resolved = self.fs.resolve(p)?;
            if resolved.is_file() {
                files.push(resolved);
            } else if resolved.is_dir() {
                let depth = if args.recursive { usize::MAX } else { 1 };
                for entry in walkdir::WalkDir::new(&resolved)
                    .max_depth(depth)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    if entry.file_type().is_file() {
                        files.push(entry.into_path());
                    }
                }
            } else {
                let full = self.fs.root().join(p);
                let paths = glob::glob(&full.to_string_lossy())
                    .map_err(|e| format!("invalid glob pattern '{}': {}", p, e))?;
                for path in paths.filter_map(|r| r.ok()) {
                    if path.is_file() && self.fs.resolve(&path.to_string_lossy()).is_ok() {
                        files.push(path);
                    }
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

#[async_trait]
impl Tool for ReadManyFilesTool {
    fn name(&self) -> &str {
        "read_many_files"
    }

    fn description(&self) -> &str {
        "Read several text files at once. Accepts files, directories and glob patterns; binary files are skipped. \
         Each file is introduced by a '--- <path> ---' line."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ReadManyArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ReadManyArgs = parse_args(args)?;
        if args.paths.is_empty() {
            return Err("paths must not be empty".to_string());
        }
        let mut excludes: Vec<&str> = args.exclude.iter().map(String::as_str).collect();
        if args.use_default_excludes {
            excludes.extend_from_slice(DEFAULT_EXCLUDES);
        }
        let exclude = PathFilter::new(excludes)?;
        let include = PathFilter::new(args.include.iter().map(String::as_str))?;

        let mut parts = Vec::new();
        for file in self.collect(&args)? {
            let rel = self.fs.display(&file);
            if exclude.matches(&rel) {
                continue;
            }
            if !include.is_empty() && !include.matches(&rel) {
                continue;
            }
            match std::fs::read(&file) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => parts.push(format!("--- {} ---\n{}", rel, text)),
                    Err(_) => parts.push(format!("--- {} (skipped: binary file) ---", rel)),
                },
                Err(e) => parts.push(format!("--- {} (read error: {}) ---", rel, e)),
            }
        }

        if parts.is_empty() {
            return Ok("No files matched the given paths and filters.".to_string());
        }
        Ok(format!("{}\n--- End of content ---", parts.join("\n")))
    }
}

/// 按正则搜索文件内容，返回 `path:line: text`
pub struct SearchFileContentTool {
    fs: SafeFs,
}

impl SearchFileContentTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for SearchFileContentTool {
    fn name(&self) -> &str {
        "search_file_content"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matching lines as 'path:line: text'."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<SearchArgs>()
    }

    fn mutating(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: SearchArgs = parse_args(args)?;
        let re = regex::Regex::new(&args.pattern)
            .map_err(|e| format!("invalid regex pattern: {}", e))?;
        let include = match args.include.as_deref() {
            Some(p) => Some(PathFilter::new([p])?),
            None => None,
        };
        let base = self.fs.resolve(args.path.as_deref().unwrap_or("."))?;
        if !base.is_dir() {
            return Err(format!(
                "path '{}' is not a directory",
                args.path.as_deref().unwrap_or(".")
            ));
        }

        let mut results = Vec::new();
        let mut truncated = false;
        'walk: for entry in walkdir::WalkDir::new(&base)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !(name.starts_with('.') || name == "target" || name == "node_modules")
            })
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_SEARCH_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let rel = self.fs.display(entry.path());
            if let Some(filter) = &include {
                if !filter.matches(&rel) {
                    continue;
                }
            }
            // 非 UTF-8 文件视为二进制跳过
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    if results.len() >= MAX_SEARCH_RESULTS {
                        truncated = true;
                        break 'walk;
                    }
                    results.push(format!("{}:{}: {}", rel, idx + 1, line.trim()));
                }
            }
        }

        if results.is_empty() {
            return Ok(format!("No matches for pattern '{}'.", args.pattern));
        }
        let mut out = results.join("\n");
        if truncated {
            out.push_str(&format!("\n(results truncated at {} matches)", MAX_SEARCH_RESULTS));
        }
        Ok(out)
    }
}

/// 全部文件工具（共享同一个沙箱）
pub fn file_tools(fs: &SafeFs) -> Vec<std::sync::Arc<dyn Tool>> {
    vec![
        std::sync::Arc::new(ListDirectoryTool::new(fs.clone())),
        std::sync::Arc::new(ReadFileTool::new(fs.clone())),
        std::sync::Arc::new(ReadManyFilesTool::new(fs.clone())),
        std::sync::Arc::new(SearchFileContentTool::new(fs.clone())),
        std::sync::Arc::new(WriteFileTool::new(fs.clone())),
        std::sync::Arc::new(DeleteFileTool::new(fs.clone())),
        std::sync::Arc::new(CreateDirectoryTool::new(fs.clone())),
        std::sync::Arc::new(DeleteDirectoryTool::new(fs.clone())),
        std::sync::Arc::new(MovePathTool::new(fs.clone())),
        std::sync::Arc::new(ModifyFileContentTool::new(fs.clone())),
    ]
}
