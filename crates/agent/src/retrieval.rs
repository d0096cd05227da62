//! Optional knowledge retrieval consulted for chit-chat turns. Best-effort:
//! an unreachable service degrades to "no snippets", never to a failed turn.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use tally_core::config::RetrievalConfig;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval service unavailable: {0}")]
    Unavailable(String),
    #[error("malformed retrieval response: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Snippet {
    pub text: String,
    #[serde(default)]
    pub score: f32,
}

#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError>;
}

/// Disabled retrieval; always empty.
pub struct NoopRetrieval;

#[async_trait]
impl RetrievalClient for NoopRetrieval {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        Ok(Vec::new())
    }
}

pub struct HttpRetrieval {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRetrieval {
    pub fn new(config: &RetrievalConfig) -> Result<Self, RetrievalError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| RetrievalError::Unavailable("no base_url configured".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| RetrievalError::Unavailable(err.to_string()))?;
        Ok(Self { http, base_url })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

#[async_trait]
impl RetrievalClient for HttpRetrieval {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({"query": query, "top_k": top_k}))
            .send()
            .await
            .map_err(|err| RetrievalError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "retrieval search rejected");
            return Err(RetrievalError::Unavailable(format!("search returned {status}")));
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|err| RetrievalError::Malformed(err.to_string()))?;
        Ok(parsed.results)
    }
}
