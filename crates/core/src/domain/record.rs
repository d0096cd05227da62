use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Row id assigned by the ledger store on insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Expense,
    Income,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "expense" => Ok(Self::Expense),
            "income" => Ok(Self::Income),
            other => Err(format!("unknown record kind `{other}`")),
        }
    }
}

/// Fields an extraction pass pulled from a single message.
///
/// Every field is optional: the extractor returns `None` for anything the
/// message did not mention, never a guess. `amount` stays in major units
/// (yuan-style decimal) until normalization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default)]
    pub kind: Option<RecordKind>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub occurred_at_text: Option<String>,
    #[serde(default)]
    pub occurred_at_iso: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.item.is_none()
            && self.amount.is_none()
            && self.currency.is_none()
            && self.occurred_at_text.is_none()
            && self.occurred_at_iso.is_none()
            && self.category.is_none()
            && self.merchant.is_none()
            && self.note.is_none()
    }
}

/// Partial record accumulated across slot-filling turns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub kind: RecordKind,
    pub item: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub occurred_at_text: Option<String>,
    pub occurred_at_iso: Option<String>,
    pub category: Option<String>,
    pub merchant: Option<String>,
    pub note: Option<String>,
    pub source_message: Option<String>,
}

impl RecordDraft {
    /// Merge one extraction pass into the draft. Absent fields leave the
    /// existing value untouched; merging an all-absent extraction is a no-op.
    pub fn merge(&mut self, fields: &ExtractedFields) {
        if let Some(kind) = fields.kind {
            self.kind = kind;
        }
        if let Some(item) = non_blank(&fields.item) {
            self.item = Some(item);
        }
        if let Some(amount) = fields.amount.and_then(Decimal::from_f64_retain) {
            self.amount = Some(amount);
        }
        if let Some(currency) = non_blank(&fields.currency) {
            self.currency = Some(currency);
        }
        if let Some(text) = non_blank(&fields.occurred_at_text) {
            self.occurred_at_text = Some(text);
        }
        if let Some(iso) = non_blank(&fields.occurred_at_iso) {
            self.occurred_at_iso = Some(iso);
        }
        if let Some(category) = non_blank(&fields.category) {
            self.category = Some(category);
        }
        if let Some(merchant) = non_blank(&fields.merchant) {
            self.merchant = Some(merchant);
        }
        if let Some(note) = non_blank(&fields.note) {
            self.note = Some(note);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.item.is_none()
            && self.amount.is_none()
            && self.currency.is_none()
            && self.occurred_at_text.is_none()
            && self.occurred_at_iso.is_none()
            && self.category.is_none()
            && self.merchant.is_none()
            && self.note.is_none()
            && self.source_message.is_none()
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

/// Fully normalized payload handed to the persistence gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub occurred_at: NaiveDateTime,
    pub item: String,
    pub amount_cents: i64,
    pub currency: String,
    pub kind: RecordKind,
    pub category: Option<String>,
    pub merchant: Option<String>,
    pub note: Option<String>,
    pub source_message: String,
}

/// Persisted ledger row. Created exactly once per successful write and
/// immutable thereafter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub occurred_at: NaiveDateTime,
    pub item: String,
    pub amount_cents: i64,
    pub currency: String,
    pub kind: RecordKind,
    pub category: Option<String>,
    pub merchant: Option<String>,
    pub note: Option<String>,
    pub source_message: Option<String>,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::{ExtractedFields, RecordDraft, RecordKind};
    use rust_decimal::Decimal;

    #[test]
    fn merge_overwrites_only_mentioned_fields() {
        let mut draft = RecordDraft {
            item: Some("早餐".to_string()),
            ..RecordDraft::default()
        };

        draft.merge(&ExtractedFields { amount: Some(10.0), ..ExtractedFields::default() });

        assert_eq!(draft.item.as_deref(), Some("早餐"));
        assert_eq!(draft.amount, Decimal::from_f64_retain(10.0));
    }

    #[test]
    fn merging_all_absent_fields_is_a_no_op() {
        let mut draft = RecordDraft {
            item: Some("咖啡".to_string()),
            amount: Some(Decimal::new(185, 1)),
            merchant: Some("星巴克".to_string()),
            ..RecordDraft::default()
        };
        let before = draft.clone();

        draft.merge(&ExtractedFields::default());

        assert_eq!(draft, before);
    }

    #[test]
    fn blank_strings_do_not_clobber_existing_values() {
        let mut draft =
            RecordDraft { item: Some("哑铃".to_string()), ..RecordDraft::default() };

        draft.merge(&ExtractedFields {
            item: Some("  ".to_string()),
            ..ExtractedFields::default()
        });

        assert_eq!(draft.item.as_deref(), Some("哑铃"));
    }

    #[test]
    fn record_kind_round_trips_through_str() {
        assert_eq!("expense".parse::<RecordKind>().ok(), Some(RecordKind::Expense));
        assert_eq!("income".parse::<RecordKind>().ok(), Some(RecordKind::Income));
        assert_eq!(RecordKind::Income.as_str(), "income");
        assert!("transfer".parse::<RecordKind>().is_err());
    }
}
