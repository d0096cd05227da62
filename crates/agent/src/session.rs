//! Per-session conversation state, keyed by session id.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tally_core::domain::session::{ConversationState, SessionId};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the state for `id`, creating a fresh one on first sight.
    async fn load(&self, id: &SessionId) -> ConversationState;

    async fn store(&self, state: ConversationState);

    /// Drop everything held for `id`; the next load starts clean.
    async fn reset(&self, id: &SessionId);
}

pub struct InMemorySessionStore {
    history_capacity: usize,
    sessions: RwLock<HashMap<String, ConversationState>>,
}

impl InMemorySessionStore {
    /// `history_turns` is the window handed to the model; the state keeps
    /// twice that many entries (user and assistant).
    pub fn new(history_turns: usize) -> Self {
        Self {
            history_capacity: history_turns.saturating_mul(2),
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &SessionId) -> ConversationState {
        if let Some(state) = self.sessions.read().await.get(&id.0) {
            return state.clone();
        }
        ConversationState::with_capacity(id.clone(), self.history_capacity)
    }

    async fn store(&self, state: ConversationState) {
        self.sessions.write().await.insert(state.session_id.0.clone(), state);
    }

    async fn reset(&self, id: &SessionId) {
        self.sessions.write().await.remove(&id.0);
    }
}

#[cfg(test)]
mod tests {
    use tally_core::domain::session::{SessionId, TurnRole};

    use super::{InMemorySessionStore, SessionStore};

    #[tokio::test]
    async fn sessions_are_isolated_by_id() {
        let store = InMemorySessionStore::new(6);
        let first = SessionId("a".to_string());
        let second = SessionId("b".to_string());

        let mut state = store.load(&first).await;
        state.push_turn(TurnRole::User, "早餐10元");
        store.store(state).await;

        assert_eq!(store.load(&first).await.turn_history.len(), 1);
        assert!(store.load(&second).await.turn_history.is_empty());
    }

    #[tokio::test]
    async fn reset_starts_a_clean_state() {
        let store = InMemorySessionStore::new(6);
        let id = SessionId("a".to_string());

        let mut state = store.load(&id).await;
        state.push_turn(TurnRole::User, "早餐10元");
        store.store(state).await;
        store.reset(&id).await;

        assert!(store.load(&id).await.turn_history.is_empty());
    }
}
