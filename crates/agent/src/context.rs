//! Conversation windowing: the slice of recent history handed to the model.

use std::collections::VecDeque;

use tally_core::domain::session::{TurnEntry, TurnRole};

use crate::llm::{ChatMessage, ChatRole};

/// Last `turns` user turns (each with its trailing assistant replies) as chat
/// messages in arrival order. The current inbound message is expected to be
/// the newest entry of `history`.
pub fn recent_window(history: &VecDeque<TurnEntry>, turns: usize) -> Vec<ChatMessage> {
    if turns == 0 {
        return Vec::new();
    }

    let mut start = history.len();
    let mut user_turns = 0;
    for (index, entry) in history.iter().enumerate().rev() {
        start = index;
        if entry.role == TurnRole::User {
            user_turns += 1;
            if user_turns == turns {
                break;
            }
        }
    }

    history.iter().skip(start).map(to_chat_message).collect()
}

fn to_chat_message(entry: &TurnEntry) -> ChatMessage {
    let role = match entry.role {
        TurnRole::User => ChatRole::User,
        TurnRole::Assistant => ChatRole::Assistant,
    };
    ChatMessage { role, content: entry.text.clone() }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tally_core::domain::session::{TurnEntry, TurnRole};

    use super::recent_window;
    use crate::llm::ChatRole;

    fn history(entries: &[(TurnRole, &str)]) -> VecDeque<TurnEntry> {
        entries
            .iter()
            .map(|(role, text)| TurnEntry { role: *role, text: (*text).to_string() })
            .collect()
    }

    #[test]
    fn keeps_only_requested_user_turns() {
        let history = history(&[
            (TurnRole::User, "我早上买了早餐"),
            (TurnRole::Assistant, "多少钱呀？"),
            (TurnRole::User, "10元"),
            (TurnRole::Assistant, "已记录"),
            (TurnRole::User, "昨天呢？"),
        ]);

        let window = recent_window(&history, 2);
        let texts: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["10元", "已记录", "昨天呢？"]);
        assert_eq!(window[0].role, ChatRole::User);
    }

    #[test]
    fn short_history_is_returned_whole() {
        let history = history(&[(TurnRole::User, "hi")]);
        assert_eq!(recent_window(&history, 6).len(), 1);
    }

    #[test]
    fn zero_turns_yields_empty_window() {
        let history = history(&[(TurnRole::User, "hi")]);
        assert!(recent_window(&history, 0).is_empty());
    }
}
