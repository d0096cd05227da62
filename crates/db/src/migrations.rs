use std::collections::HashSet;

use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Apply pending migrations and report the ones this run actually applied,
/// as `NNNN description` labels in version order. Already-applied migrations
/// are not listed again.
pub async fn run_pending(pool: &DbPool) -> Result<Vec<String>, MigrateError> {
    let already_applied = applied_versions(pool).await;
    MIGRATOR.run(pool).await?;

    Ok(MIGRATOR
        .iter()
        .filter(|migration| !already_applied.contains(&migration.version))
        .map(|migration| format!("{:04} {}", migration.version, migration.description))
        .collect())
}

/// Versions recorded in the sqlx bookkeeping table. A fresh database has no
/// such table yet, which reads as "nothing applied".
async fn applied_versions(pool: &DbPool) -> HashSet<i64> {
    sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations")
        .fetch_all(pool)
        .await
        .map(|versions| versions.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect;
    use tally_core::config::DatabaseConfig;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "records",
        "chat_log",
        "idx_records_occurred_at",
        "idx_records_kind_occurred_at",
        "idx_chat_log_session_id",
    ];

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 30,
            busy_timeout_ms: 5000,
        }
    }

    #[tokio::test]
    async fn migrations_create_baseline_schema() {
        let pool = connect(&memory_config()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master \
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("check schema object")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{object}` after migration");
        }
    }

    #[tokio::test]
    async fn fresh_run_reports_applied_migrations_and_rerun_reports_none() {
        let pool = connect(&memory_config()).await.expect("connect");

        let first = run_pending(&pool).await.expect("first run");
        assert!(!first.is_empty());
        assert!(first[0].starts_with("0001"), "unexpected label: {}", first[0]);

        let second = run_pending(&pool).await.expect("second run");
        assert!(second.is_empty(), "rerun should apply nothing, got {second:?}");
    }
}
