//! Required-slot schema and completeness checks.
//!
//! A record needs `item` and `amount` before it may be persisted; everything
//! else defaults or stays empty. Missing slots are reported in a fixed
//! priority order so follow-up prompts stay deterministic across turns.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::record::RecordDraft;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotField {
    Item,
    Amount,
}

impl SlotField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Amount => "amount",
        }
    }
}

impl std::fmt::Display for SlotField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item before amount, always.
pub fn required_fields() -> [SlotField; 2] {
    [SlotField::Item, SlotField::Amount]
}

/// Missing required slots in prompt priority order.
pub fn diff_missing(draft: &RecordDraft) -> Vec<SlotField> {
    let mut missing = Vec::new();
    if !has_item(draft) {
        missing.push(SlotField::Item);
    }
    if !has_amount(draft) {
        missing.push(SlotField::Amount);
    }
    missing
}

pub fn is_complete(draft: &RecordDraft) -> bool {
    diff_missing(draft).is_empty()
}

fn has_item(draft: &RecordDraft) -> bool {
    draft.item.as_deref().is_some_and(|item| !item.trim().is_empty())
}

fn has_amount(draft: &RecordDraft) -> bool {
    draft.amount.is_some_and(|amount| amount > Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{diff_missing, is_complete, required_fields, SlotField};
    use crate::domain::record::RecordDraft;

    #[test]
    fn empty_draft_misses_both_slots_in_priority_order() {
        let missing = diff_missing(&RecordDraft::default());
        assert_eq!(missing, vec![SlotField::Item, SlotField::Amount]);
        assert_eq!(missing, required_fields().to_vec());
    }

    #[test]
    fn item_only_draft_misses_amount() {
        let draft = RecordDraft { item: Some("早餐".to_string()), ..RecordDraft::default() };
        assert_eq!(diff_missing(&draft), vec![SlotField::Amount]);
        assert!(!is_complete(&draft));
    }

    #[test]
    fn zero_or_negative_amount_counts_as_missing() {
        let draft = RecordDraft {
            item: Some("早餐".to_string()),
            amount: Some(Decimal::ZERO),
            ..RecordDraft::default()
        };
        assert_eq!(diff_missing(&draft), vec![SlotField::Amount]);
    }

    #[test]
    fn blank_item_counts_as_missing() {
        let draft = RecordDraft {
            item: Some("   ".to_string()),
            amount: Some(Decimal::TEN),
            ..RecordDraft::default()
        };
        assert_eq!(diff_missing(&draft), vec![SlotField::Item]);
    }

    #[test]
    fn item_and_positive_amount_complete_the_draft() {
        let draft = RecordDraft {
            item: Some("早餐".to_string()),
            amount: Some(Decimal::TEN),
            ..RecordDraft::default()
        };
        assert!(is_complete(&draft));
        assert!(diff_missing(&draft).is_empty());
    }
}
