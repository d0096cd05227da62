use thiserror::Error;

/// Domain-level failures recovered locally by re-prompting; they never
/// surface as a crash. Raw detail goes to the logs, not the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid time: {0}")]
    InvalidTime(String),
}
