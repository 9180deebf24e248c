//! 记忆层：对话消息模型、历史摘要压缩、会话持久化

pub mod conversation;
pub mod history;
pub mod sqlite;
pub mod store;

pub use conversation::{render_transcript, Message, ToolCallRequest};
pub use history::{split_point, Compaction, HistoryManager};
pub use sqlite::SqliteSessionStore;
pub use store::{InMemorySessionStore, SessionStore, StoreError};
