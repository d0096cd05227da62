//! Per-turn orchestration.
//!
//! One inbound message flows through exactly one of two paths: a fresh turn
//! (classify, extract, merge) or a fill turn (arbitrate against the pending
//! record). Both funnel into `finish_draft`, the only place a record is
//! normalized and written, so a turn can never persist more than once.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use tally_core::config::LedgerConfig;
use tally_core::domain::record::{NewRecord, RecordDraft, RecordId};
use tally_core::domain::session::{ConversationState, SessionId, TurnRole};
use tally_core::normalize::{normalize_amount, normalize_time};
use tally_core::slots::{self, SlotField};
use tally_db::repositories::{ChatLogRepository, LedgerRepository};

use crate::adapters::{Classifier, Extractor, FillAction, FillArbiter, Intent};
use crate::context::recent_window;
use crate::llm::ChatMessage;
use crate::responder::{ReplyAction, Responder};
use crate::session::SessionStore;

/// What a turn did, alongside the user-facing reply.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnAction {
    Logged(RecordId),
    AwaitingFill(Vec<SlotField>),
    SaveFailed,
    Cancelled,
    Conversation,
}

#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub action: TurnAction,
}

pub struct TurnEngine {
    classifier: Arc<dyn Classifier>,
    extractor: Arc<dyn Extractor>,
    arbiter: Arc<dyn FillArbiter>,
    responder: Responder,
    ledger: Arc<dyn LedgerRepository>,
    chat_log: Arc<dyn ChatLogRepository>,
    sessions: Arc<dyn SessionStore>,
    default_currency: String,
    history_turns: usize,
    clock: fn() -> NaiveDateTime,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[allow(clippy::too_many_arguments)]
impl TurnEngine {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        extractor: Arc<dyn Extractor>,
        arbiter: Arc<dyn FillArbiter>,
        responder: Responder,
        ledger: Arc<dyn LedgerRepository>,
        chat_log: Arc<dyn ChatLogRepository>,
        sessions: Arc<dyn SessionStore>,
        ledger_config: &LedgerConfig,
    ) -> Self {
        Self {
            classifier,
            extractor,
            arbiter,
            responder,
            ledger,
            chat_log,
            sessions,
            default_currency: ledger_config.default_currency.clone(),
            history_turns: ledger_config.history_turns,
            clock: local_now,
        }
    }

    /// Pin "now" for time anchoring; tests use this for deterministic dates.
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Process one inbound message and produce the reply for it.
    pub async fn handle_turn(&self, session_id: &SessionId, text: &str) -> TurnOutcome {
        let mut state = self.sessions.load(session_id).await;
        self.log_chat(session_id, TurnRole::User, text).await;
        state.push_turn(TurnRole::User, text);

        let window = recent_window(&state.turn_history, self.history_turns);
        let outcome = if state.is_awaiting_fill() {
            self.fill_turn(&mut state, text, &window).await
        } else {
            self.fresh_turn(&mut state, text, &window).await
        };

        debug_assert!(state.invariant_holds());
        state.push_turn(TurnRole::Assistant, &outcome.reply);
        self.log_chat(session_id, TurnRole::Assistant, &outcome.reply).await;
        self.sessions.store(state).await;

        outcome
    }

    /// Forget the session entirely (`/new`).
    pub async fn reset_session(&self, session_id: &SessionId) {
        info!(session_id = %session_id, "session reset");
        self.sessions.reset(session_id).await;
    }

    async fn fresh_turn(
        &self,
        state: &mut ConversationState,
        text: &str,
        window: &[ChatMessage],
    ) -> TurnOutcome {
        let intent = self.classifier.classify(window).await;
        info!(session_id = %state.session_id, intent = ?intent, "turn classified");

        match intent {
            Intent::LogExpense => {
                let fields = self.extractor.extract(window, &state.pending_record).await;
                // A retained unsaved draft (earlier storage failure) is the
                // merge basis so a retry completes it instead of starting over.
                let mut draft = state.pending_record.clone();
                draft.merge(&fields);
                draft.source_message = Some(text.to_string());
                self.finish_draft(state, draft, text).await
            }
            Intent::RelatedChat => {
                let reply = self.responder.respond(state, text, &ReplyAction::RelatedChat).await;
                TurnOutcome { reply, action: TurnAction::Conversation }
            }
            Intent::Other => {
                let reply = self.responder.respond(state, text, &ReplyAction::SmallTalk).await;
                TurnOutcome { reply, action: TurnAction::Conversation }
            }
        }
    }

    async fn fill_turn(
        &self,
        state: &mut ConversationState,
        text: &str,
        window: &[ChatMessage],
    ) -> TurnOutcome {
        let decision =
            self.arbiter.decide(window, &state.pending_record, &state.missing_fields).await;
        info!(session_id = %state.session_id, action = ?decision.action, "fill turn arbitrated");

        match decision.action {
            FillAction::Fill => {
                let mut draft = state.pending_record.clone();
                draft.merge(&decision.slots);
                draft.source_message = Some(text.to_string());
                self.finish_draft(state, draft, text).await
            }
            FillAction::NewLog => {
                let mut draft = RecordDraft::default();
                draft.merge(&decision.slots);
                draft.source_message = Some(text.to_string());
                self.finish_draft(state, draft, text).await
            }
            FillAction::Cancel => {
                state.clear_pending();
                let reply = self.responder.respond(state, text, &ReplyAction::Cancelled).await;
                TurnOutcome { reply, action: TurnAction::Cancelled }
            }
            FillAction::Unrelated => {
                let missing = state.missing_fields.clone();
                let reply = self
                    .responder
                    .respond(state, text, &ReplyAction::UnrelatedDuringFill { missing })
                    .await;
                TurnOutcome { reply, action: TurnAction::Conversation }
            }
        }
    }

    /// Completeness gate plus the single persistence point.
    async fn finish_draft(
        &self,
        state: &mut ConversationState,
        draft: RecordDraft,
        text: &str,
    ) -> TurnOutcome {
        let missing = slots::diff_missing(&draft);
        if !missing.is_empty() {
            state.await_fill(draft, missing.clone());
            let reply = self
                .responder
                .respond(state, text, &ReplyAction::AskSlots { missing: missing.clone() })
                .await;
            return TurnOutcome { reply, action: TurnAction::AwaitingFill(missing) };
        }

        // diff_missing guarantees a positive amount here.
        let amount = draft.amount.unwrap_or_default();
        let normalized =
            match normalize_amount(amount, draft.currency.as_deref(), &self.default_currency) {
                Ok(normalized) => normalized,
                Err(err) => {
                    warn!(session_id = %state.session_id, error = %err, "amount rejected");
                    let mut draft = draft;
                    draft.amount = None;
                    let missing = slots::diff_missing(&draft);
                    state.await_fill(draft, missing.clone());
                    let reply = self
                        .responder
                        .respond(state, text, &ReplyAction::AskSlots { missing: missing.clone() })
                        .await;
                    return TurnOutcome { reply, action: TurnAction::AwaitingFill(missing) };
                }
            };

        let occurred_at = normalize_time(
            draft.occurred_at_text.as_deref(),
            draft.occurred_at_iso.as_deref(),
            (self.clock)(),
        );

        let record = NewRecord {
            occurred_at,
            item: draft.item.clone().unwrap_or_default(),
            amount_cents: normalized.amount_cents,
            currency: normalized.currency.clone(),
            kind: draft.kind,
            category: draft.category.clone(),
            merchant: draft.merchant.clone(),
            note: draft.note.clone(),
            source_message: draft.source_message.clone().unwrap_or_else(|| text.to_string()),
        };

        match self.ledger.insert(record.clone()).await {
            Ok(id) => {
                info!(
                    session_id = %state.session_id,
                    record_id = id.0,
                    amount_cents = record.amount_cents,
                    "record persisted"
                );
                state.clear_pending();
                let reply = self
                    .responder
                    .respond(
                        state,
                        text,
                        &ReplyAction::Saved {
                            item: record.item,
                            amount_cents: record.amount_cents,
                            currency: record.currency,
                            occurred_at: record.occurred_at,
                        },
                    )
                    .await;
                TurnOutcome { reply, action: TurnAction::Logged(id) }
            }
            Err(err) => {
                warn!(session_id = %state.session_id, error = %err, "persist failed, draft kept");
                state.retain_unsaved(draft);
                let reply = self.responder.respond(state, text, &ReplyAction::SaveFailed).await;
                TurnOutcome { reply, action: TurnAction::SaveFailed }
            }
        }
    }

    async fn log_chat(&self, session_id: &SessionId, role: TurnRole, text: &str) {
        // Best effort: a dead chat log must not kill the turn.
        if let Err(err) = self.chat_log.append(session_id, role, text).await {
            warn!(session_id = %session_id, error = %err, "chat log append failed");
        }
    }
}
