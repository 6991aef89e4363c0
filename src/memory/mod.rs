pub mod models;
pub mod rest;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

pub use models::{ChatState, ScoreRecord, UserMemory};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Corrupt stored state: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Per-user persistence seam for the engine.
///
/// Implementations only need durability, not coordination: the engine
/// serializes same-user read-modify-write cycles with its own keyed lock,
/// and every call is awaited under a bounded timeout with warn-and-continue
/// semantics — a failing store degrades to "scored but not persisted".
pub trait MemoryStore: Send + Sync {
    /// Load one user's memory. `Ok(None)` means the user has no state yet.
    fn load(&self, user: &str) -> impl Future<Output = Result<Option<UserMemory>>> + Send;

    /// Append one scored record to the user's history.
    fn append_record(
        &self,
        user: &str,
        record: &ScoreRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Persist the user's chat-batching state (and nickname, when given).
    fn update_chat_state(
        &self,
        user: &str,
        nickname: Option<&str>,
        state: &ChatState,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Process-local store backed by a hash map. Used by tests and by
/// ephemeral runs where durability doesn't matter.
#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, UserMemory>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryStore {
    async fn load(&self, user: &str) -> Result<Option<UserMemory>> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(user).cloned())
    }

    async fn append_record(&self, user: &str, record: &ScoreRecord) -> Result<()> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        users
            .entry(user.to_string())
            .or_insert_with(|| UserMemory::new(user))
            .history
            .push(record.clone());
        Ok(())
    }

    async fn update_chat_state(
        &self,
        user: &str,
        nickname: Option<&str>,
        state: &ChatState,
    ) -> Result<()> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        let memory = users
            .entry(user.to_string())
            .or_insert_with(|| UserMemory::new(user));
        if let Some(nick) = nickname {
            memory.nickname = Some(nick.to_string());
        }
        memory.chat_state = state.clone();
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Corrupt("memory store lock poisoned".to_string())
}
