pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, DbPool};
#[cfg(feature = "mysql")]
pub use connection::{connect_mysql, MySqlDbPool};
pub use repositories::{
    ChatLogEntry, ChatLogRepository, InMemoryChatLog, InMemoryLedgerRepository,
    LedgerRepository, RepositoryError, SqlChatLog, SqlLedgerRepository,
};
#[cfg(feature = "mysql")]
pub use repositories::{MySqlChatLog, MySqlLedgerRepository};
