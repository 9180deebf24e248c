//! 会话存储抽象层
//!
//! 核心只依赖 get / put 语义：按 session id 读取与整体写回 SessionState。
//! 不同 session id 之间完全隔离。

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::SessionState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 读取会话；不存在时返回 None
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;

    /// 整体写回会话
    async fn put(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError>;
}

/// 内存会话存储（进程退出即丢失）
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }
}
