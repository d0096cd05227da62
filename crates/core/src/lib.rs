//! Tally core - domain model for the conversational ledger
//!
//! Everything in this crate is pure and synchronous: record/draft/session
//! types, the required-slot schema, amount/time normalization, ledger query
//! plans, domain errors, and configuration loading. The async
//! edges (inference backends, SQLite, retrieval) live in `tally-agent` and
//! `tally-db` and depend on this crate, never the other way around.

pub mod config;
pub mod domain;
pub mod errors;
pub mod normalize;
pub mod slots;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use domain::query::{LedgerSummary, QueryMetric, QueryPlan, SummaryRow};
pub use domain::record::{
    ExtractedFields, NewRecord, Record, RecordDraft, RecordId, RecordKind,
};
pub use domain::session::{Awaiting, ConversationState, SessionId, TurnEntry, TurnRole};
pub use errors::DomainError;
pub use normalize::{anchor_time, normalize_amount, normalize_time, NormalizedAmount};
pub use slots::SlotField;
