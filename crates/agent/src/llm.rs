//! Chat-completion client with a structured (function-calling) invocation
//! path. Speaks the OpenAI-compatible API, which also covers local Ollama.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use tally_core::config::LlmConfig;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),
    #[error("inference request timed out")]
    Timeout,
    #[error("malformed inference response: {0}")]
    Malformed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// One forced tool call: the model must answer by "calling" the named
/// function with arguments matching `schema`.
#[derive(Clone, Debug)]
pub struct StructuredTask {
    pub name: &'static str,
    pub instructions: &'static str,
    pub schema: Value,
    pub messages: Vec<ChatMessage>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form completion; the first message is expected to carry the
    /// system instructions.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Structured completion. Returns the parsed tool-call arguments.
    async fn invoke_structured(&self, task: StructuredTask) -> Result<Value, LlmError>;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| LlmError::Unavailable(err.to_string()))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self { http, base_url, api_key: config.api_key.clone(), model: config.model.clone() })
    }

    async fn send(&self, body: Value) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Unavailable(format!("backend returned {status}: {detail}")));
        }
        response.json().await.map_err(|err| LlmError::Malformed(err.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
        });
        let response = self.send(body).await?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| LlmError::Malformed("completion carried no content".to_string()))
    }

    async fn invoke_structured(&self, task: StructuredTask) -> Result<Value, LlmError> {
        let mut messages = vec![ChatMessage::system(task.instructions)];
        messages.extend(task.messages);

        let body = json!({
            "model": self.model,
            "messages": messages,
            "tools": [{
                "type": "function",
                "function": {
                    "name": task.name,
                    "description": task.instructions,
                    "parameters": task.schema,
                },
            }],
            "tool_choice": {"type": "function", "function": {"name": task.name}},
        });

        let response = self.send(body).await?;
        debug!(task = task.name, "structured completion received");
        tool_arguments(&response, task.name)
    }
}

/// Pull the forced tool-call arguments out of a chat completion, tolerating
/// both the `tool_calls` array and the legacy top-level `function_call`.
fn tool_arguments(response: &Value, name: &str) -> Result<Value, LlmError> {
    let message = &response["choices"][0]["message"];

    let arguments = message["tool_calls"][0]["function"]["arguments"]
        .as_str()
        .or_else(|| message["function_call"]["arguments"].as_str())
        .ok_or_else(|| {
            LlmError::Malformed(format!("no `{name}` tool call in completion"))
        })?;

    serde_json::from_str(arguments)
        .map_err(|err| LlmError::Malformed(format!("unparsable `{name}` arguments: {err}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::tool_arguments;

    #[test]
    fn parses_tool_calls_shape() {
        let response = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "function": {
                            "name": "classify",
                            "arguments": "{\"intent\": \"log_expense\"}",
                        },
                    }],
                },
            }],
        });
        let arguments = tool_arguments(&response, "classify").expect("arguments");
        assert_eq!(arguments["intent"], "log_expense");
    }

    #[test]
    fn parses_legacy_function_call_shape() {
        let response = json!({
            "choices": [{
                "message": {
                    "function_call": {
                        "name": "classify",
                        "arguments": "{\"intent\": \"other\"}",
                    },
                },
            }],
        });
        let arguments = tool_arguments(&response, "classify").expect("arguments");
        assert_eq!(arguments["intent"], "other");
    }

    #[test]
    fn missing_call_is_malformed() {
        let response = json!({"choices": [{"message": {"content": "hi"}}]});
        assert!(tool_arguments(&response, "classify").is_err());
    }

    #[test]
    fn unparsable_arguments_are_malformed() {
        let response = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{"function": {"name": "classify", "arguments": "not json"}}],
                },
            }],
        });
        assert!(tool_arguments(&response, "classify").is_err());
    }
}
