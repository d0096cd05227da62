//! Final reply generation. The turn outcome is already decided by the time
//! this runs; the model only phrases it. When the model (or retrieval) is
//! down, deterministic templates keep the bot talking.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{debug, warn};

use tally_core::domain::session::ConversationState;
use tally_core::slots::SlotField;

use crate::context::recent_window;
use crate::llm::{ChatMessage, LlmClient};
use crate::retrieval::{RetrievalClient, Snippet};

const FINALIZE_INSTRUCTIONS: &str = "\
You are a friendly bookkeeping assistant chatting with the user. The turn \
outcome is already decided and given to you as JSON; phrase it as one short, \
warm reply in the user's language. Never change amounts, items, or times, \
never claim something was saved unless the outcome says so, and when fields \
are listed as missing, ask for them plainly. If reference snippets are \
provided you may draw on them.";

/// What the engine decided this turn; the responder only narrates it.
#[derive(Clone, Debug)]
pub enum ReplyAction {
    Saved { item: String, amount_cents: i64, currency: String, occurred_at: NaiveDateTime },
    SaveFailed,
    AskSlots { missing: Vec<SlotField> },
    Cancelled,
    RelatedChat,
    SmallTalk,
    UnrelatedDuringFill { missing: Vec<SlotField> },
}

pub struct Responder {
    llm: Arc<dyn LlmClient>,
    retrieval: Arc<dyn RetrievalClient>,
    retrieval_top_k: usize,
    history_turns: usize,
}

impl Responder {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retrieval: Arc<dyn RetrievalClient>,
        retrieval_top_k: usize,
        history_turns: usize,
    ) -> Self {
        Self { llm, retrieval, retrieval_top_k, history_turns }
    }

    pub async fn respond(
        &self,
        state: &ConversationState,
        message: &str,
        action: &ReplyAction,
    ) -> String {
        let mut messages = vec![
            ChatMessage::system(FINALIZE_INSTRUCTIONS),
            ChatMessage::system(format!("Turn outcome: {}", outcome_snapshot(action))),
        ];

        if matches!(action, ReplyAction::RelatedChat | ReplyAction::UnrelatedDuringFill { .. }) {
            if let Some(snippets) = self.consult_retrieval(message).await {
                messages.push(ChatMessage::system(format!("Reference snippets: {snippets}")));
            }
        }

        messages.extend(recent_window(&state.turn_history, self.history_turns));

        match self.llm.complete(&messages).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "finalizer unavailable, using fallback template");
                fallback_reply(action)
            }
        }
    }

    async fn consult_retrieval(&self, query: &str) -> Option<String> {
        match self.retrieval.search(query, self.retrieval_top_k).await {
            Ok(snippets) if snippets.is_empty() => None,
            Ok(snippets) => {
                debug!(count = snippets.len(), "retrieval snippets attached");
                Some(
                    rank_by_score(snippets)
                        .iter()
                        .map(|snippet| format!("- {}", snippet.text))
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }
            Err(err) => {
                warn!(error = %err, "retrieval skipped");
                None
            }
        }
    }
}

/// Best match first, whatever order the service returned them in.
fn rank_by_score(mut snippets: Vec<Snippet>) -> Vec<Snippet> {
    snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
    snippets
}

fn outcome_snapshot(action: &ReplyAction) -> String {
    let snapshot = match action {
        ReplyAction::Saved { item, amount_cents, currency, occurred_at } => json!({
            "outcome": "saved",
            "item": item,
            "amount": format_cents(*amount_cents),
            "currency": currency,
            "occurred_at": occurred_at.format("%Y-%m-%d %H:%M").to_string(),
        }),
        ReplyAction::SaveFailed => json!({
            "outcome": "save_failed",
            "note": "the record was kept and will be retried; do not claim it was saved",
        }),
        ReplyAction::AskSlots { missing } => json!({
            "outcome": "need_fields",
            "missing": missing.iter().map(SlotField::as_str).collect::<Vec<_>>(),
        }),
        ReplyAction::Cancelled => json!({"outcome": "cancelled"}),
        ReplyAction::RelatedChat => json!({"outcome": "chat", "topic": "money_related"}),
        ReplyAction::SmallTalk => json!({"outcome": "chat", "topic": "small_talk"}),
        ReplyAction::UnrelatedDuringFill { missing } => json!({
            "outcome": "digression",
            "note": "answer briefly, then remind the user about the pending record",
            "missing": missing.iter().map(SlotField::as_str).collect::<Vec<_>>(),
        }),
    };
    snapshot.to_string()
}

fn fallback_reply(action: &ReplyAction) -> String {
    match action {
        ReplyAction::Saved { item, amount_cents, currency, occurred_at } => format!(
            "已记下：{item} {}（{currency}，{}）",
            format_cents(*amount_cents),
            occurred_at.format("%Y-%m-%d %H:%M"),
        ),
        ReplyAction::SaveFailed => {
            "这条暂时没能保存，内容我先留着了，稍后再发一次就行。".to_string()
        }
        ReplyAction::AskSlots { missing } => match missing.first() {
            Some(SlotField::Item) => "想记哪一项呢？比如“早餐”。".to_string(),
            Some(SlotField::Amount) => "多少钱呢？比如 10 或 18.5。".to_string(),
            None => "还差一点信息，再补充一下吧。".to_string(),
        },
        ReplyAction::Cancelled => "好的，这条不记了。".to_string(),
        ReplyAction::RelatedChat | ReplyAction::SmallTalk => {
            "我在呢～想记账直接说就行，比如“早餐 10 元”。".to_string()
        }
        ReplyAction::UnrelatedDuringFill { missing } => {
            let ask = match missing.first() {
                Some(SlotField::Item) => "想记哪一项呢？",
                Some(SlotField::Amount) => "多少钱呢？",
                None => "再补充一下吧。",
            };
            format!("刚才那笔还差一点信息，{ask}")
        }
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use crate::retrieval::Snippet;

    use super::{format_cents, rank_by_score};

    #[test]
    fn cents_format_as_major_units() {
        assert_eq!(format_cents(1000), "10.00");
        assert_eq!(format_cents(1850), "18.50");
        assert_eq!(format_cents(5), "0.05");
    }

    #[test]
    fn snippets_rank_best_score_first() {
        let snippets = vec![
            Snippet { text: "a".to_string(), score: 0.2 },
            Snippet { text: "b".to_string(), score: 0.9 },
            Snippet { text: "c".to_string(), score: 0.5 },
        ];

        let ranked = rank_by_score(snippets);
        let texts: Vec<_> = ranked.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c", "a"]);
    }
}
