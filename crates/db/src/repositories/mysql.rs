//! MySQL backend, behind the `mysql` feature. Same trait surface and the
//! same filter SQL as the SQLite implementation; only the DDL and the
//! aggregate casts are dialect-specific. Timestamps are stored as the same
//! ISO8601 text so ordering and range bounds behave identically.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySql, QueryBuilder, Row};

use tally_core::domain::query::{LedgerSummary, QueryMetric, QueryPlan, SummaryRow};
use tally_core::domain::record::{NewRecord, Record, RecordId, RecordKind};
use tally_core::domain::session::{SessionId, TurnRole};

use super::ledger::{parse_stored_time, push_filters, MINUTE_FORMAT, SECOND_FORMAT};
use super::{ChatLogEntry, ChatLogRepository, LedgerRepository, RepositoryError};
use crate::MySqlDbPool;

/// Create the managed tables if absent. A networked server is provisioned
/// per deployment, so the schema rides along here instead of going through
/// the sqlite migrator.
pub async fn ensure_schema(pool: &MySqlDbPool) -> Result<(), RepositoryError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS records (
           id BIGINT PRIMARY KEY AUTO_INCREMENT,
           occurred_at VARCHAR(19) NOT NULL,
           item VARCHAR(255) NOT NULL,
           amount_cents BIGINT NOT NULL,
           currency VARCHAR(8) NOT NULL,
           kind ENUM('expense', 'income') NOT NULL,
           category VARCHAR(64) NULL,
           merchant VARCHAR(64) NULL,
           note VARCHAR(255) NULL,
           source_message TEXT NULL,
           created_at VARCHAR(19) NOT NULL,
           INDEX idx_records_occurred_at (occurred_at),
           INDEX idx_records_kind_occurred_at (kind, occurred_at)
         ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat_log (
           id BIGINT PRIMARY KEY AUTO_INCREMENT,
           session_id VARCHAR(64) NOT NULL,
           role ENUM('user', 'assistant') NOT NULL,
           text TEXT NOT NULL,
           logged_at VARCHAR(20) NOT NULL,
           INDEX idx_chat_log_session_id (session_id, id)
         ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub struct MySqlLedgerRepository {
    pool: MySqlDbPool,
}

impl MySqlLedgerRepository {
    pub fn new(pool: MySqlDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for MySqlLedgerRepository {
    async fn insert(&self, record: NewRecord) -> Result<RecordId, RepositoryError> {
        let created_at = Utc::now().naive_utc().format(SECOND_FORMAT).to_string();
        let result = sqlx::query(
            "INSERT INTO records \
             (occurred_at, item, amount_cents, currency, kind, category, merchant, note, \
              source_message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.occurred_at.format(MINUTE_FORMAT).to_string())
        .bind(&record.item)
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.kind.as_str())
        .bind(&record.category)
        .bind(&record.merchant)
        .bind(&record.note)
        .bind(&record.source_message)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(RecordId(result.last_insert_id() as i64))
    }

    async fn summarize(&self, plan: &QueryPlan) -> Result<LedgerSummary, RepositoryError> {
        let plan = plan.clone().ordered();

        // SUM/AVG come back as DECIMAL here; cast so the row decodes like
        // the sqlite backend's.
        let mut builder = QueryBuilder::<MySql>::new(
            "SELECT COUNT(*) AS total_rows, \
             CAST(COALESCE(SUM(amount_cents), 0) AS SIGNED) AS total_cents, \
             CAST(COALESCE(AVG(amount_cents), 0.0) AS DOUBLE) AS avg_cents \
             FROM records",
        );
        push_filters(&mut builder, &plan);
        let row = builder.build().fetch_one(&self.pool).await?;

        let total_rows: i64 = row.get("total_rows");
        let mut summary = LedgerSummary {
            metric: plan.metric,
            total_rows,
            ..LedgerSummary::default()
        };
        match plan.metric {
            QueryMetric::Sum => summary.total_cents = Some(row.get("total_cents")),
            QueryMetric::Avg => {
                summary.total_cents = Some(row.get("total_cents"));
                summary.avg_cents = Some(row.get("avg_cents"));
            }
            QueryMetric::Count | QueryMetric::List | QueryMetric::Latest => {}
        }

        match plan.metric {
            QueryMetric::List => {
                let mut builder = QueryBuilder::<MySql>::new(
                    "SELECT occurred_at, item, amount_cents, currency, category, merchant \
                     FROM records",
                );
                push_filters(&mut builder, &plan);
                builder.push(" ORDER BY occurred_at ASC");
                let rows = builder.build().fetch_all(&self.pool).await?;
                summary.details = rows
                    .iter()
                    .map(|row| SummaryRow {
                        occurred_at: row.get("occurred_at"),
                        item: row.get("item"),
                        amount_cents: row.get("amount_cents"),
                        currency: row.get("currency"),
                        category: row.get("category"),
                        merchant: row.get("merchant"),
                    })
                    .collect();
            }
            QueryMetric::Latest => {
                let mut builder = QueryBuilder::<MySql>::new(
                    "SELECT id, occurred_at, item, amount_cents, currency, kind, category, \
                     merchant, note, source_message, created_at FROM records",
                );
                push_filters(&mut builder, &plan);
                builder.push(" ORDER BY occurred_at DESC, id DESC LIMIT 1");
                if let Some(row) = builder.build().fetch_optional(&self.pool).await? {
                    summary.latest = Some(decode_record(&row)?);
                }
            }
            _ => {}
        }

        Ok(summary)
    }
}

fn decode_record(row: &sqlx::mysql::MySqlRow) -> Result<Record, RepositoryError> {
    let kind: String = row.get("kind");
    let kind = kind.parse::<RecordKind>().map_err(RepositoryError::Decode)?;
    Ok(Record {
        id: RecordId(row.get("id")),
        occurred_at: parse_stored_time(&row.get::<String, _>("occurred_at"))?,
        item: row.get("item"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        kind,
        category: row.get("category"),
        merchant: row.get("merchant"),
        note: row.get("note"),
        source_message: row.get("source_message"),
        created_at: parse_stored_time(&row.get::<String, _>("created_at"))?,
    })
}

pub struct MySqlChatLog {
    pool: MySqlDbPool,
}

impl MySqlChatLog {
    pub fn new(pool: MySqlDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatLogRepository for MySqlChatLog {
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

        entries.reverse();
        Ok(entries)
    }
}
