use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use tally_core::domain::record::{ExtractedFields, RecordDraft};

use crate::llm::{ChatMessage, LlmClient, StructuredTask};

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Pull record fields out of the newest message. Absent means absent:
    /// a failed extraction returns all fields unset, never a guess.
    async fn extract(&self, window: &[ChatMessage], draft: &RecordDraft) -> ExtractedFields;
}

const EXTRACT_INSTRUCTIONS: &str = "\
Extract transaction fields from the latest user message in a bookkeeping chat.
Rules:
- Only report what the message actually states. Omit every field the message \
does not mention; never guess or invent values.
- amount is a plain decimal in major units (e.g. \"10元\" -> 10, \
\"十八块五\" -> 18.5). Strip currency words into the currency field (ISO-ish \
code like CNY, USD) only when the user names one.
- occurred_at_text is the user's own time phrase verbatim (e.g. \"昨天早上\"); \
occurred_at_iso only when the message carries an explicit date or datetime.
- kind is expense unless the message clearly reports money received \
(wages, refund, red packet), then income.
- The draft in context shows slots already filled; report a field again only \
if the latest message restates or corrects it.";

fn extract_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "kind": {"type": "string", "enum": ["expense", "income"]},
            "item": {"type": "string", "description": "what was bought or received"},
            "amount": {"type": "number", "description": "major units, e.g. 10.5"},
            "currency": {"type": "string"},
            "occurred_at_text": {"type": "string"},
            "occurred_at_iso": {"type": "string"},
            "category": {"type": "string"},
            "merchant": {"type": "string"},
            "note": {"type": "string"},
        },
        "required": [],
    })
}

pub struct LlmExtractor {
    llm: Arc<dyn LlmClient>,
}

impl LlmExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, window: &[ChatMessage], draft: &RecordDraft) -> ExtractedFields {
        let mut messages = vec![super::draft_snapshot(draft)];
        messages.extend_from_slice(window);

        let task = StructuredTask {
            name: "extract_fields",
            instructions: EXTRACT_INSTRUCTIONS,
            schema: extract_schema(),
            messages,
        };

        match self.llm.invoke_structured(task).await {
            Ok(arguments) => match serde_json::from_value::<ExtractedFields>(arguments) {
                Ok(fields) => fields,
                Err(err) => {
                    warn!(error = %err, "extractor answered off-schema, treating as empty");
                    ExtractedFields::default()
                }
            },
            Err(err) => {
                warn!(error = %err, "extractor unavailable, treating as empty");
                ExtractedFields::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use tally_core::domain::record::{RecordDraft, RecordKind};

    use super::{Extractor, LlmExtractor};
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
    async fn decodes_partial_field_set() {
        let extractor = LlmExtractor::new(Arc::new(CannedLlm(Ok(json!({
            "item": "早餐",
            "amount": 10.0,
            "occurred_at_text": "早上",
        })))));

        let fields = extractor
            .extract(&[ChatMessage::user("我早上买了个早餐花了10元")], &RecordDraft::default())
            .await;

        assert_eq!(fields.item.as_deref(), Some("早餐"));
        assert_eq!(fields.amount, Some(10.0));
        assert_eq!(fields.occurred_at_text.as_deref(), Some("早上"));
        assert!(fields.kind.is_none());
        assert!(fields.currency.is_none());
    }

    #[tokio::test]
    async fn income_kind_is_decoded() {
        let extractor = LlmExtractor::new(Arc::new(CannedLlm(Ok(json!({
            "kind": "income",
            "item": "工资",
            "amount": 8000.0,
        })))));

        let fields =
            extractor.extract(&[ChatMessage::user("发工资了8000")], &RecordDraft::default()).await;
        assert_eq!(fields.kind, Some(RecordKind::Income));
    }

    #[tokio::test]
    async fn backend_failure_yields_all_absent() {
        let extractor = LlmExtractor::new(Arc::new(CannedLlm(Err(()))));
        let fields =
            extractor.extract(&[ChatMessage::user("早餐10元")], &RecordDraft::default()).await;
        assert!(fields.is_empty());
    }
}
