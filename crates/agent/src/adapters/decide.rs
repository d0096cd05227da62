use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use tally_core::domain::record::{ExtractedFields, RecordDraft};
use tally_core::slots::SlotField;

use crate::llm::{ChatMessage, LlmClient, StructuredTask};

/// How a message relates to the record currently waiting on slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillAction {
    /// Supplies (some of) the missing slots of the pending record.
    Fill,
    /// Abandons the pending record and starts describing a new one.
    NewLog,
    /// Explicitly abandons the pending record.
    Cancel,
    /// Unrelated digression; the pending record stays as-is.
    Unrelated,
}

/// Arbiter verdict plus the slots it already re-extracted, so a fill turn
/// never needs a second model call.
#[derive(Clone, Debug)]
pub struct FillDecision {
    pub action: FillAction,
    pub slots: ExtractedFields,
}

#[async_trait]
pub trait FillArbiter: Send + Sync {
    /// Decide what the newest message means for the pending record.
    /// An unreachable backend reads as [`FillAction::Unrelated`], which
    /// leaves the pending record untouched.
    async fn decide(
        &self,
        window: &[ChatMessage],
        draft: &RecordDraft,
        missing: &[SlotField],
    ) -> FillDecision;
}

const DECIDE_INSTRUCTIONS: &str = "\
A draft transaction is waiting for missing fields. Decide what the latest \
user message means for it:
- fill: the message supplies missing or corrected fields for the draft \
(e.g. the draft lacks an amount and the user says \"10元\").
- new_log: the message describes a different transaction, not the draft.
- cancel: the user no longer wants the draft recorded (\"不记了\", \"算了\").
- unrelated: anything else; the draft should stay untouched.
For fill and new_log also extract the transaction fields from the message, \
following the same rules as initial extraction: only what the message states, \
amount in major units, no guessed values.";

fn decide_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["fill", "new_log", "cancel", "unrelated"],
            },
            "slots": {
                "type": "object",
                "properties": {
                    "kind": {"type": "string", "enum": ["expense", "income"]},
                    "item": {"type": "string"},
                    "amount": {"type": "number"},
                    "currency": {"type": "string"},
                    "occurred_at_text": {"type": "string"},
                    "occurred_at_iso": {"type": "string"},
                    "category": {"type": "string"},
                    "merchant": {"type": "string"},
                    "note": {"type": "string"},
                },
            },
        },
        "required": ["action"],
    })
}

#[derive(Debug, Deserialize)]
struct DecisionOut {
    action: FillAction,
    #[serde(default)]
    slots: ExtractedFields,
}

pub struct LlmFillArbiter {
    llm: Arc<dyn LlmClient>,
}

impl LlmFillArbiter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl FillArbiter for LlmFillArbiter {
    async fn decide(
        &self,
        window: &[ChatMessage],
        draft: &RecordDraft,
        missing: &[SlotField],
    ) -> FillDecision {
        let missing: Vec<&str> = missing.iter().map(SlotField::as_str).collect();
        let mut messages = vec![
            super::draft_snapshot(draft),
            ChatMessage::system(format!("Missing fields: {}", missing.join(", "))),
        ];
        messages.extend_from_slice(window);

        let task = StructuredTask {
            name: "decide_fill",
            instructions: DECIDE_INSTRUCTIONS,
            schema: decide_schema(),
            messages,
        };

        match self.llm.invoke_structured(task).await {
            Ok(arguments) => match serde_json::from_value::<DecisionOut>(arguments) {
                Ok(out) => FillDecision { action: out.action, slots: out.slots },
                Err(err) => {
                    warn!(error = %err, "fill arbiter answered off-schema, treating as unrelated");
                    unrelated()
                }
            },
            Err(err) => {
                warn!(error = %err, "fill arbiter unavailable, treating as unrelated");
                unrelated()
            }
        }
    }
}

fn unrelated() -> FillDecision {
    FillDecision { action: FillAction::Unrelated, slots: ExtractedFields::default() }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use tally_core::domain::record::RecordDraft;
    use tally_core::slots::SlotField;

    use super::{FillAction, FillArbiter, LlmFillArbiter};
    use crate::llm::{ChatMessage, LlmClient, LlmError, StructuredTask};

    struct CannedLlm(Result<Value, ()>);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            Err(LlmError::Unavailable("canned".to_string()))
        }

        async fn invoke_structured(&self, _task: StructuredTask) -> Result<Value, LlmError> {
            self.0.clone().map_err(|_| LlmError::Unavailable("canned".to_string()))
        }
    }

    #[tokio::test]
    async fn fill_carries_re_extracted_slots() {
        let arbiter = LlmFillArbiter::new(Arc::new(CannedLlm(Ok(json!({
            "action": "fill",
            "slots": {"amount": 10.0},
        })))));

        let decision = arbiter
            .decide(&[ChatMessage::user("10元")], &RecordDraft::default(), &[SlotField::Amount])
            .await;

        assert_eq!(decision.action, FillAction::Fill);
        assert_eq!(decision.slots.amount, Some(10.0));
    }

    #[tokio::test]
    async fn missing_slots_object_defaults_to_empty() {
        let arbiter = LlmFillArbiter::new(Arc::new(CannedLlm(Ok(json!({
            "action": "cancel",
        })))));

        let decision = arbiter
            .decide(&[ChatMessage::user("算了不记了")], &RecordDraft::default(), &[])
            .await;

        assert_eq!(decision.action, FillAction::Cancel);
        assert!(decision.slots.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_unrelated() {
        let arbiter = LlmFillArbiter::new(Arc::new(CannedLlm(Err(()))));
        let decision = arbiter
            .decide(&[ChatMessage::user("10元")], &RecordDraft::default(), &[SlotField::Amount])
            .await;
        assert_eq!(decision.action, FillAction::Unrelated);
        assert!(decision.slots.is_empty());
    }
}
