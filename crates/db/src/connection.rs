//! Pool construction, driven entirely by [`DatabaseConfig`].

use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use tally_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Open a SQLite pool with the configured limits. Every connection gets the
/// same session pragmas: foreign keys on, WAL journaling, and the configured
/// busy timeout so concurrent writers queue instead of failing fast.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let busy_timeout_ms = config.busy_timeout_ms;
    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await
}

#[cfg(feature = "mysql")]
pub type MySqlDbPool = sqlx::MySqlPool;

/// Open a MySQL pool with the configured limits. Session behavior that SQLite
/// sets via pragmas (referential integrity, lock wait) is server-side here,
/// so only the pool limits apply.
#[cfg(feature = "mysql")]
pub async fn connect_mysql(config: &DatabaseConfig) -> Result<MySqlDbPool, sqlx::Error> {
    sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .connect(&config.url)
        .await
}
