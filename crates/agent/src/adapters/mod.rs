//! Inference adapters: thin, schema-checked wrappers around the LLM.
//!
//! Each adapter owns its prompt and output schema, decodes the tool-call
//! arguments into a typed struct, and degrades to a conservative default when
//! the model is unreachable or answers off-schema. Nothing downstream ever
//! sees raw model output.

use serde_json::json;

use tally_core::domain::record::RecordDraft;

use crate::llm::ChatMessage;

pub mod classify;
pub mod decide;
pub mod extract;

pub use classify::{Classifier, Intent, LlmClassifier};
pub use decide::{FillAction, FillArbiter, FillDecision, LlmFillArbiter};
pub use extract::{Extractor, LlmExtractor};

/// Current draft rendered as a system message so the model can see which
/// slots are already filled.
fn draft_snapshot(draft: &RecordDraft) -> ChatMessage {
    let snapshot = json!({
        "kind": draft.kind.as_str(),
        "item": draft.item,
        "amount": draft.amount,
        "currency": draft.currency,
        "occurred_at_text": draft.occurred_at_text,
        "occurred_at_iso": draft.occurred_at_iso,
        "category": draft.category,
        "merchant": draft.merchant,
        "note": draft.note,
    });
    ChatMessage::system(format!("Current draft record (filled slots so far): {snapshot}"))
}
