use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use tally_core::domain::session::{SessionId, TurnRole};

use super::{ChatLogEntry, ChatLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChatLog {
    pool: DbPool,
}

impl SqlChatLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatLogRepository for SqlChatLog {
    async fn append(
        &self,
        session_id: &SessionId,
        role: TurnRole,
        text: &str,
    ) -> Result<(), RepositoryError> {
        let logged_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        sqlx::query("INSERT INTO chat_log (session_id, role, text, logged_at) VALUES (?, ?, ?, ?)")
            .bind(&session_id.0)
            .bind(role.as_str())
            .bind(text)
            .bind(logged_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<ChatLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT role, text, logged_at FROM chat_log \
             WHERE session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(&session_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                let role = match role.as_str() {
                    "user" => TurnRole::User,
                    "assistant" => TurnRole::Assistant,
                    other => {
                        return Err(RepositoryError::Decode(format!(
                            "unknown chat role `{other}`"
                        )))
                    }
                };
                Ok(ChatLogEntry { role, text: row.get("text"), logged_at: row.get("logged_at") })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Stored newest-first for the LIMIT; callers want arrival order.
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use tally_core::domain::session::{SessionId, TurnRole};

    use super::SqlChatLog;
    use crate::repositories::ChatLogRepository;
    use crate::{connect, migrations};
    use tally_core::config::DatabaseConfig;

    async fn log() -> SqlChatLog {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 30,
            busy_timeout_ms: 5000,
        };
        let pool = connect(&config).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlChatLog::new(pool)
    }

    #[tokio::test]
    async fn append_preserves_arrival_order_per_session() {
        let log = log().await;
        let session = SessionId("s-1".to_string());
        let other = SessionId("s-2".to_string());

        log.append(&session, TurnRole::User, "我早上买了早餐").await.expect("append");
        log.append(&session, TurnRole::Assistant, "多少钱呀？").await.expect("append");
        log.append(&other, TurnRole::User, "unrelated").await.expect("append");
        log.append(&session, TurnRole::User, "10元").await.expect("append");

        let entries = log.recent(&session, 10).await.expect("recent");
        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["我早上买了早餐", "多少钱呀？", "10元"]);
    }

    #[tokio::test]
    async fn recent_honors_limit_keeping_newest() {
        let log = log().await;
        let session = SessionId("s-1".to_string());
        for i in 0..5 {
            log.append(&session, TurnRole::User, &format!("m{i}")).await.expect("append");
        }

        let entries = log.recent(&session, 2).await.expect("recent");
        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
    }
}
