use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::record::RecordDraft;
use crate::slots::SlotField;

/// Opaque session identifier, stable for the session lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Awaiting {
    #[default]
    None,
    Fill,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub role: TurnRole,
    pub text: String,
}

/// Per-session dialogue state.
///
/// Invariant: `awaiting == Fill` exactly when `missing_fields` is non-empty.
/// All mutation goes through [`await_fill`](Self::await_fill),
/// [`clear_pending`](Self::clear_pending) and [`reset`](Self::reset) so the
/// invariant holds at every turn boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: SessionId,
    pub awaiting: Awaiting,
    pub pending_record: RecordDraft,
    pub missing_fields: Vec<SlotField>,
    pub turn_history: VecDeque<TurnEntry>,
    pub history_capacity: usize,
}

/// Default bound on retained (role, text) pairs; roughly six turns of
/// user/assistant exchange.
pub const DEFAULT_HISTORY_CAPACITY: usize = 12;

impl ConversationState {
    pub fn new(session_id: SessionId) -> Self {
        Self::with_capacity(session_id, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(session_id: SessionId, history_capacity: usize) -> Self {
        Self {
            session_id,
            awaiting: Awaiting::None,
            pending_record: RecordDraft::default(),
            missing_fields: Vec::new(),
            turn_history: VecDeque::new(),
            history_capacity: history_capacity.max(2),
        }
    }

    /// Append a turn, evicting the oldest entry once the bound is reached.
    pub fn push_turn(&mut self, role: TurnRole, text: impl Into<String>) {
        if self.turn_history.len() == self.history_capacity {
            self.turn_history.pop_front();
        }
        self.turn_history.push_back(TurnEntry { role, text: text.into() });
    }

    /// Block on the given missing slots. An empty list is treated as
    /// "nothing missing" and clears the fill state instead.
    pub fn await_fill(&mut self, draft: RecordDraft, missing: Vec<SlotField>) {
        if missing.is_empty() {
            self.pending_record = draft;
            self.awaiting = Awaiting::None;
            self.missing_fields.clear();
            return;
        }
        self.pending_record = draft;
        self.missing_fields = missing;
        self.awaiting = Awaiting::Fill;
    }

    /// Drop the pending record (after a persist or a cancel).
    pub fn clear_pending(&mut self) {
        self.pending_record = RecordDraft::default();
        self.missing_fields.clear();
        self.awaiting = Awaiting::None;
    }

    /// Retain a completed-but-unsaved draft after a storage failure. The
    /// record is whole, so nothing is missing and `awaiting` stays `None`.
    pub fn retain_unsaved(&mut self, draft: RecordDraft) {
        self.pending_record = draft;
        self.missing_fields.clear();
        self.awaiting = Awaiting::None;
    }

    /// Full reset to Idle with empty history (`/new`).
    pub fn reset(&mut self) {
        self.clear_pending();
        self.turn_history.clear();
    }

    pub fn is_awaiting_fill(&self) -> bool {
        self.awaiting == Awaiting::Fill
    }

    /// The completeness invariant, checked by tests on every reachable state.
    pub fn invariant_holds(&self) -> bool {
        (self.awaiting == Awaiting::Fill) == !self.missing_fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Awaiting, ConversationState, SessionId, TurnRole};
    use crate::domain::record::RecordDraft;
    use crate::slots::SlotField;

    fn state() -> ConversationState {
        ConversationState::with_capacity(SessionId("s-1".to_string()), 4)
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut state = state();
        for i in 0..6 {
            state.push_turn(TurnRole::User, format!("m{i}"));
        }

        assert_eq!(state.turn_history.len(), 4);
        assert_eq!(state.turn_history.front().map(|t| t.text.as_str()), Some("m2"));
        assert_eq!(state.turn_history.back().map(|t| t.text.as_str()), Some("m5"));
    }

    #[test]
    fn await_fill_upholds_invariant_both_ways() {
        let mut state = state();

        state.await_fill(RecordDraft::default(), vec![SlotField::Amount]);
        assert_eq!(state.awaiting, Awaiting::Fill);
        assert!(state.invariant_holds());

        state.await_fill(RecordDraft::default(), Vec::new());
        assert_eq!(state.awaiting, Awaiting::None);
        assert!(state.invariant_holds());
    }

    #[test]
    fn reset_returns_to_idle_with_empty_history() {
        let mut state = state();
        state.push_turn(TurnRole::User, "我早上买了早餐");
        state.await_fill(
            RecordDraft { item: Some("早餐".to_string()), ..RecordDraft::default() },
            vec![SlotField::Amount],
        );

        state.reset();

        assert_eq!(state.awaiting, Awaiting::None);
        assert!(state.pending_record.is_empty());
        assert!(state.missing_fields.is_empty());
        assert!(state.turn_history.is_empty());
        assert!(state.invariant_holds());
    }

    #[test]
    fn retained_unsaved_draft_keeps_awaiting_none() {
        let mut state = state();
        let draft = RecordDraft { item: Some("早餐".to_string()), ..RecordDraft::default() };

        state.retain_unsaved(draft.clone());

        assert_eq!(state.awaiting, Awaiting::None);
        assert_eq!(state.pending_record, draft);
        assert!(state.invariant_holds());
    }
}
