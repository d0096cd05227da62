//! Conversation engine for the tally ledger.
//!
//! This crate turns free-form chat into ledger records:
//! - **Adapters** (`adapters`) - classify intent, extract record fields, and
//!   arbitrate follow-up turns while a record is missing required slots
//! - **State machine** (`machine`) - the per-turn orchestrator that merges
//!   extracted fields into a draft, normalizes it, and persists at most one
//!   record per turn
//! - **Responder** (`responder`) - final user-facing reply, LLM-phrased with a
//!   deterministic fallback so a dead model never silences the bot
//!
//! # Safety Principle
//!
//! The LLM is strictly a translator. It never invents amounts or items and it
//! never decides what gets persisted. Completeness checks, normalization, and
//! the single-write rule are deterministic code in `machine` and `tally-core`.

pub mod adapters;
pub mod context;
pub mod llm;
pub mod machine;
pub mod responder;
pub mod retrieval;
pub mod session;

pub use adapters::{
    Classifier, Extractor, FillAction, FillArbiter, FillDecision, Intent, LlmClassifier,
    LlmExtractor, LlmFillArbiter,
};
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmError, OpenAiClient, StructuredTask};
pub use machine::{TurnEngine, TurnAction, TurnOutcome};
pub use responder::Responder;
pub use retrieval::{HttpRetrieval, NoopRetrieval, RetrievalClient, Snippet};
pub use session::{InMemorySessionStore, SessionStore};
