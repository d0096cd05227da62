use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::llm::{ChatMessage, LlmClient, StructuredTask};

/// Coarse intent of one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// The user wants a transaction recorded.
    LogExpense,
    /// Money-adjacent chat that records nothing (prices, budgets, advice).
    RelatedChat,
    /// Everything else.
    Other,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify the newest message; `window` ends with that message.
    /// Infallible by contract: an unreachable backend reads as [`Intent::Other`].
    async fn classify(&self, window: &[ChatMessage]) -> Intent;
}

const CLASSIFY_INSTRUCTIONS: &str = "\
You label the intent of the latest user message in a bookkeeping chat.
Labels:
- log_expense: the user reports a transaction to record (a purchase, a cost, \
income received), e.g. \"我早上买了个早餐\", \"地铁 4 块\", \"发工资了 8000\".
- related_chat: money-related talk that records nothing, e.g. asking prices, \
budgets, or advice (\"最近咖啡太贵了\").
- other: greetings, small talk, anything unrelated to money.
Label only the latest message; earlier turns are context.";

fn classify_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "intent": {
                "type": "string",
                "enum": ["log_expense", "related_chat", "other"],
            },
        },
        "required": ["intent"],
    })
}

#[derive(Debug, Deserialize)]
struct IntentOut {
    intent: Intent,
}

pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, window: &[ChatMessage]) -> Intent {
        let task = StructuredTask {
            name: "classify_intent",
            instructions: CLASSIFY_INSTRUCTIONS,
            schema: classify_schema(),
            messages: window.to_vec(),
        };

        match self.llm.invoke_structured(task).await {
            Ok(arguments) => match serde_json::from_value::<IntentOut>(arguments) {
                Ok(out) => out.intent,
                Err(err) => {
                    warn!(error = %err, "classifier answered off-schema, treating as other");
                    Intent::Other
                }
            },
            Err(err) => {
                warn!(error = %err, "classifier unavailable, treating as other");
                Intent::Other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{Classifier, Intent, LlmClassifier};
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
    async fn decodes_intent_label() {
        let classifier = LlmClassifier::new(Arc::new(CannedLlm(Ok(json!({
            "intent": "log_expense",
        })))));
        let intent = classifier.classify(&[ChatMessage::user("早餐10元")]).await;
        assert_eq!(intent, Intent::LogExpense);
    }

    #[tokio::test]
    async fn unknown_label_degrades_to_other() {
        let classifier = LlmClassifier::new(Arc::new(CannedLlm(Ok(json!({
            "intent": "query_summary",
        })))));
        let intent = classifier.classify(&[ChatMessage::user("上周花了多少")]).await;
        assert_eq!(intent, Intent::Other);
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_other() {
        let classifier = LlmClassifier::new(Arc::new(CannedLlm(Err(()))));
        let intent = classifier.classify(&[ChatMessage::user("早餐10元")]).await;
        assert_eq!(intent, Intent::Other);
    }
}
