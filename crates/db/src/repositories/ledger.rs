use async_trait::async_trait;
use chrono::{Days, NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};

use tally_core::domain::query::{LedgerSummary, QueryMetric, QueryPlan, SummaryRow};
use tally_core::domain::record::{NewRecord, Record, RecordId, RecordKind};

use super::{LedgerRepository, RepositoryError};
use crate::DbPool;

/// Minute-precision storage format for `occurred_at`; lexicographic order
/// matches chronological order.
pub(super) const MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%M";
pub(super) const SECOND_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct SqlLedgerRepository {
    pool: DbPool,
}

impl SqlLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for SqlLedgerRepository {
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

        Ok(RecordId(result.last_insert_rowid()))
    }

    async fn summarize(&self, plan: &QueryPlan) -> Result<LedgerSummary, RepositoryError> {
        let plan = plan.clone().ordered();

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) AS total_rows, \
             COALESCE(SUM(amount_cents), 0) AS total_cents, \
             COALESCE(AVG(amount_cents), 0.0) AS avg_cents \
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
                let mut builder = QueryBuilder::<Sqlite>::new(
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
                let mut builder = QueryBuilder::<Sqlite>::new(
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

/// Append the plan's WHERE clauses. Generic over the database so every
/// backend filters with byte-identical SQL; all bound values are strings.
pub(super) fn push_filters<'args, DB>(builder: &mut QueryBuilder<'args, DB>, plan: &QueryPlan)
where
    DB: sqlx::Database,
    String: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
{
    builder.push(" WHERE 1 = 1");

    if let Some(start) = plan.start {
        builder.push(" AND occurred_at >= ").push_bind(format!("{start}T00:00"));
    }
    if let Some(end) = plan.end {
        // Inclusive end date becomes a half-open bound at the next midnight.
        if let Some(next) = end.checked_add_days(Days::new(1)) {
            builder.push(" AND occurred_at < ").push_bind(format!("{next}T00:00"));
        }
    }

    if !plan.item_keywords.is_empty() {
        builder.push(" AND (");
        for (index, keyword) in plan.item_keywords.iter().enumerate() {
            if index > 0 {
                builder.push(" OR ");
            }
            builder.push("LOWER(item) LIKE ").push_bind(format!("%{}%", keyword.to_lowercase()));
        }
        builder.push(")");
    }

    if !plan.categories.is_empty() {
        builder.push(" AND category IN (");
        let mut separated = builder.separated(", ");
        for category in &plan.categories {
            separated.push_bind(category.clone());
        }
        builder.push(")");
    }

    if !plan.merchants.is_empty() {
        builder.push(" AND merchant IN (");
        let mut separated = builder.separated(", ");
        for merchant in &plan.merchants {
            separated.push_bind(merchant.clone());
        }
        builder.push(")");
    }

    if let Some(note) = plan.note_contains.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        builder.push(" AND LOWER(note) LIKE ").push_bind(format!("%{}%", note.to_lowercase()));
    }
}

fn decode_record(row: &sqlx::sqlite::SqliteRow) -> Result<Record, RepositoryError> {
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

pub(super) fn parse_stored_time(raw: &str) -> Result<NaiveDateTime, RepositoryError> {
    NaiveDateTime::parse_from_str(raw, SECOND_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, MINUTE_FORMAT))
        .map_err(|_| RepositoryError::Decode(format!("unparsable stored timestamp `{raw}`")))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use tally_core::domain::query::{QueryMetric, QueryPlan};
    use tally_core::domain::record::{NewRecord, RecordKind};

    use super::SqlLedgerRepository;
    use crate::repositories::LedgerRepository;
    use crate::{connect, migrations};
    use tally_core::config::DatabaseConfig;

    async fn repo() -> SqlLedgerRepository {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 30,
            busy_timeout_ms: 5000,
        };
        let pool = connect(&config).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlLedgerRepository::new(pool)
    }

    fn record(day: u32, item: &str, cents: i64) -> NewRecord {
        NewRecord {
            occurred_at: NaiveDate::from_ymd_opt(2025, 8, day)
                .and_then(|d| d.and_hms_opt(8, 0, 0))
                .expect("valid date"),
            item: item.to_string(),
            amount_cents: cents,
            currency: "CNY".to_string(),
            kind: RecordKind::Expense,
            category: Some("food".to_string()),
            merchant: None,
            note: None,
            source_message: format!("买了{item}"),
        }
    }

    #[tokio::test]
    async fn insert_assigns_monotonic_ids() {
        let repo = repo().await;
        let first = repo.insert(record(1, "早餐", 1000)).await.expect("insert");
        let second = repo.insert(record(2, "咖啡", 1850)).await.expect("insert");
        assert!(second.0 > first.0);
    }

    #[tokio::test]
    async fn sum_over_date_range_uses_half_open_bounds() {
        let repo = repo().await;
        repo.insert(record(10, "早餐", 1000)).await.expect("insert");
        repo.insert(record(11, "午餐", 2500)).await.expect("insert");
        repo.insert(record(12, "晚餐", 4000)).await.expect("insert");

        let summary = repo
            .summarize(&QueryPlan {
                metric: QueryMetric::Sum,
                start: NaiveDate::from_ymd_opt(2025, 8, 10),
                end: NaiveDate::from_ymd_opt(2025, 8, 11),
                ..QueryPlan::default()
            })
            .await
            .expect("summarize");

        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.total_cents, Some(3500));
    }

    #[tokio::test]
    async fn keyword_filter_matches_case_insensitively() {
        let repo = repo().await;
        repo.insert(record(10, "Breakfast", 1000)).await.expect("insert");
        repo.insert(record(11, "dumbbell", 9900)).await.expect("insert");

        let summary = repo
            .summarize(&QueryPlan {
                metric: QueryMetric::Count,
                item_keywords: vec!["breakfast".to_string()],
                ..QueryPlan::default()
            })
            .await
            .expect("summarize");

        assert_eq!(summary.total_rows, 1);
    }

    #[tokio::test]
    async fn latest_returns_most_recent_record() {
        let repo = repo().await;
        repo.insert(record(10, "早餐", 1000)).await.expect("insert");
        repo.insert(record(20, "哑铃", 9900)).await.expect("insert");

        let summary = repo
            .summarize(&QueryPlan { metric: QueryMetric::Latest, ..QueryPlan::default() })
            .await
            .expect("summarize");

        let latest = summary.latest.expect("latest record");
        assert_eq!(latest.item, "哑铃");
        assert_eq!(latest.amount_cents, 9900);
    }

    #[tokio::test]
    async fn list_returns_details_in_chronological_order() {
        let repo = repo().await;
        repo.insert(record(20, "哑铃", 9900)).await.expect("insert");
        repo.insert(record(10, "早餐", 1000)).await.expect("insert");

        let summary = repo
            .summarize(&QueryPlan { metric: QueryMetric::List, ..QueryPlan::default() })
            .await
            .expect("summarize");

        let items: Vec<_> = summary.details.iter().map(|row| row.item.as_str()).collect();
        assert_eq!(items, vec!["早餐", "哑铃"]);
    }
}
