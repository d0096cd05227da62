use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use tally_core::domain::query::{LedgerSummary, QueryMetric, QueryPlan, SummaryRow};
use tally_core::domain::record::{NewRecord, Record, RecordId};
use tally_core::domain::session::{SessionId, TurnRole};

use super::{ChatLogEntry, ChatLogRepository, LedgerRepository, RepositoryError};

/// In-memory ledger for tests and ephemeral runs. Writes can be toggled to
/// fail so storage-outage paths are exercisable without a real database.
#[derive(Default)]
pub struct InMemoryLedgerRepository {
    records: RwLock<Vec<Record>>,
    fail_writes: AtomicBool,
}

impl InMemoryLedgerRepository {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<Record> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn insert(&self, record: NewRecord) -> Result<RecordId, RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Decode("simulated storage outage".to_string()));
        }

        let mut records = self.records.write().await;
        let id = RecordId(records.len() as i64 + 1);
        records.push(Record {
            id,
            occurred_at: record.occurred_at,
            item: record.item,
            amount_cents: record.amount_cents,
            currency: record.currency,
            kind: record.kind,
            category: record.category,
            merchant: record.merchant,
            note: record.note,
            source_message: Some(record.source_message),
            created_at: Utc::now().naive_utc(),
        });
        Ok(id)
    }

    async fn summarize(&self, plan: &QueryPlan) -> Result<LedgerSummary, RepositoryError> {
        let plan = plan.clone().ordered();
        let records = self.records.read().await;

        let mut matched: Vec<&Record> =
            records.iter().filter(|record| matches_plan(record, &plan)).collect();
        matched.sort_by_key(|record| record.occurred_at);

        let total_rows = matched.len() as i64;
        let total: i64 = matched.iter().map(|record| record.amount_cents).sum();

        let mut summary =
            LedgerSummary { metric: plan.metric, total_rows, ..LedgerSummary::default() };
        match plan.metric {
            QueryMetric::Sum => summary.total_cents = Some(total),
            QueryMetric::Avg => {
                summary.total_cents = Some(total);
                summary.avg_cents =
                    Some(if total_rows == 0 { 0.0 } else { total as f64 / total_rows as f64 });
            }
            QueryMetric::Count => {}
            QueryMetric::List => {
                summary.details = matched
                    .iter()
                    .map(|record| SummaryRow {
                        occurred_at: record.occurred_at.format("%Y-%m-%dT%H:%M").to_string(),
                        item: record.item.clone(),
                        amount_cents: record.amount_cents,
                        currency: record.currency.clone(),
                        category: record.category.clone(),
                        merchant: record.merchant.clone(),
                    })
                    .collect();
            }
            QueryMetric::Latest => summary.latest = matched.last().map(|record| (*record).clone()),
        }

        Ok(summary)
    }
}

fn matches_plan(record: &Record, plan: &QueryPlan) -> bool {
    if let Some(start) = plan.start {
        if record.occurred_at.date() < start {
            return false;
        }
    }
    if let Some(end) = plan.end {
        if record.occurred_at.date() > end {
            return false;
        }
    }
    if !plan.item_keywords.is_empty() {
        let item = record.item.to_lowercase();
        if !plan.item_keywords.iter().any(|kw| item.contains(&kw.to_lowercase())) {
            return false;
        }
    }
    if !plan.categories.is_empty() {
        match &record.category {
            Some(category) if plan.categories.contains(category) => {}
            _ => return false,
        }
    }
    if !plan.merchants.is_empty() {
        match &record.merchant {
            Some(merchant) if plan.merchants.contains(merchant) => {}
            _ => return false,
        }
    }
    if let Some(needle) = plan.note_contains.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        match &record.note {
            Some(note) if note.to_lowercase().contains(&needle.to_lowercase()) => {}
            _ => return false,
        }
    }
    true
}

/// In-memory conversation log mirroring [`SqlChatLog`](super::SqlChatLog).
#[derive(Default)]
pub struct InMemoryChatLog {
    entries: RwLock<Vec<(SessionId, ChatLogEntry)>>,
}

#[async_trait]
impl ChatLogRepository for InMemoryChatLog {
    async fn append(
        &self,
        session_id: &SessionId,
        role: TurnRole,
        text: &str,
    ) -> Result<(), RepositoryError> {
        let logged_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        self.entries.write().await.push((
            session_id.clone(),
            ChatLogEntry { role, text: text.to_string(), logged_at },
        ));
        Ok(())
    }

    async fn recent(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<ChatLogEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let matching: Vec<ChatLogEntry> = entries
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, entry)| entry.clone())
            .collect();
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use tally_core::domain::query::{QueryMetric, QueryPlan};
    use tally_core::domain::record::{NewRecord, RecordKind};

    use super::InMemoryLedgerRepository;
    use crate::repositories::LedgerRepository;

    fn record(item: &str, cents: i64) -> NewRecord {
        NewRecord {
            occurred_at: NaiveDate::from_ymd_opt(2025, 8, 20)
                .and_then(|d| d.and_hms_opt(8, 0, 0))
                .expect("valid date"),
            item: item.to_string(),
            amount_cents: cents,
            currency: "CNY".to_string(),
            kind: RecordKind::Expense,
            category: None,
            merchant: None,
            note: None,
            source_message: item.to_string(),
        }
    }

    #[tokio::test]
    async fn write_round_trip_and_sum() {
        let repo = InMemoryLedgerRepository::default();
        repo.insert(record("早餐", 1000)).await.expect("insert");
        repo.insert(record("咖啡", 1850)).await.expect("insert");

        let summary = repo
            .summarize(&QueryPlan { metric: QueryMetric::Sum, ..QueryPlan::default() })
            .await
            .expect("summarize");
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.total_cents, Some(2850));
    }

    #[tokio::test]
    async fn toggled_failure_rejects_writes_without_recording() {
        let repo = InMemoryLedgerRepository::default();
        repo.set_fail_writes(true);
        assert!(repo.insert(record("早餐", 1000)).await.is_err());
        assert!(repo.records().await.is_empty());

        repo.set_fail_writes(false);
        repo.insert(record("早餐", 1000)).await.expect("insert after recovery");
        assert_eq!(repo.records().await.len(), 1);
    }
}
