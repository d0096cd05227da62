use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::record::Record;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMetric {
    #[default]
    Sum,
    Avg,
    Count,
    List,
    Latest,
}

/// Structured filter over the ledger, built by callers (CLI reporting) and
/// executed by the ledger repository. Date bounds are inclusive; the
/// repository converts them to half-open minute bounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub metric: QueryMetric,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub item_keywords: Vec<String>,
    pub categories: Vec<String>,
    pub merchants: Vec<String>,
    pub note_contains: Option<String>,
}

impl QueryPlan {
    /// Swap reversed bounds so `start <= end` always holds downstream.
    pub fn ordered(mut self) -> Self {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                self.start = Some(end);
                self.end = Some(start);
            }
        }
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub occurred_at: String,
    pub item: String,
    pub amount_cents: i64,
    pub currency: String,
    pub category: Option<String>,
    pub merchant: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub metric: QueryMetric,
    pub total_rows: i64,
    pub total_cents: Option<i64>,
    pub avg_cents: Option<f64>,
    pub details: Vec<SummaryRow>,
    pub latest: Option<Record>,
}
