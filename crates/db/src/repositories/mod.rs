use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_core::domain::query::{LedgerSummary, QueryPlan};
use tally_core::domain::record::{NewRecord, RecordId};
use tally_core::domain::session::{SessionId, TurnRole};

pub mod chat_log;
pub mod ledger;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;

pub use chat_log::SqlChatLog;
pub use ledger::SqlLedgerRepository;
pub use memory::{InMemoryChatLog, InMemoryLedgerRepository};
#[cfg(feature = "mysql")]
pub use mysql::{MySqlChatLog, MySqlLedgerRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable ledger store. `insert` must be atomic at single-record
/// granularity: a reader never observes a partial record.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn insert(&self, record: NewRecord) -> Result<RecordId, RepositoryError>;
    async fn summarize(&self, plan: &QueryPlan) -> Result<LedgerSummary, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub role: TurnRole,
    pub text: String,
    pub logged_at: String,
}

/// Append-only conversation log in arrival order, written for every inbound
/// turn whether or not it produced a persisted record.
#[async_trait]
pub trait ChatLogRepository: Send + Sync {
    async fn append(
        &self,
        session_id: &SessionId,
        role: TurnRole,
        text: &str,
    ) -> Result<(), RepositoryError>;

    async fn recent(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<ChatLogEntry>, RepositoryError>;
}
