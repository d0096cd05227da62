use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::commands::CommandResult;
use tally_agent::adapters::{LlmClassifier, LlmExtractor, LlmFillArbiter};
use tally_agent::llm::{LlmClient, OpenAiClient};
use tally_agent::responder::Responder;
use tally_agent::retrieval::{HttpRetrieval, NoopRetrieval, RetrievalClient};
use tally_agent::session::InMemorySessionStore;
use tally_agent::machine::TurnEngine;
use tally_core::config::{AppConfig, LoadOptions};
use tally_core::domain::session::SessionId;
use tally_db::repositories::{ChatLogEntry, ChatLogRepository, SqlChatLog, SqlLedgerRepository};
use tally_db::{connect, migrations};

pub fn run(session: Option<String>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(chat_loop(&config, session));

    match result {
        Ok(turns) => CommandResult::success("chat", format!("session ended after {turns} turns")),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

async fn chat_loop(
    config: &AppConfig,
    session: Option<String>,
) -> Result<usize, (&'static str, String, u8)> {
    let pool = connect(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenAiClient::new(&config.llm)
            .map_err(|error| ("llm_init", error.to_string(), 6u8))?,
    );

    let retrieval: Arc<dyn RetrievalClient> = if config.retrieval.enabled {
        Arc::new(
            HttpRetrieval::new(&config.retrieval)
                .map_err(|error| ("retrieval_init", error.to_string(), 6u8))?,
        )
    } else {
        Arc::new(NoopRetrieval)
    };

    let responder = Responder::new(
        llm.clone(),
        retrieval,
        config.retrieval.top_k,
        config.ledger.history_turns,
    );

    let chat_log = Arc::new(SqlChatLog::new(pool.clone()));
    let engine = TurnEngine::new(
        Arc::new(LlmClassifier::new(llm.clone())),
        Arc::new(LlmExtractor::new(llm.clone())),
        Arc::new(LlmFillArbiter::new(llm)),
        responder,
        Arc::new(SqlLedgerRepository::new(pool.clone())),
        chat_log.clone(),
        Arc::new(InMemorySessionStore::new(config.ledger.history_turns)),
        &config.ledger,
    );

    let resuming = session.is_some();
    let session_id =
        SessionId(session.unwrap_or_else(|| Uuid::new_v4().simple().to_string()));
    println!("tally chat (session {session_id}) — /new starts over, exit quits");

    if resuming {
        let limit = (config.ledger.history_turns * 2) as u32;
        match chat_log.recent(&session_id, limit).await {
            Ok(entries) if !entries.is_empty() => println!("{}", history_banner(&entries)),
            Ok(_) => {}
            Err(error) => warn!(error = %error, "could not load session history"),
        }
    }

    let stdin = io::stdin();
    let mut turns = 0usize;
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => return Err(("stdin", error.to_string(), 7u8)),
        }

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            break;
        }
        if text == "/new" {
            engine.reset_session(&session_id).await;
            println!("开始新会话。");
            continue;
        }

        let outcome = engine.handle_turn(&session_id, text).await;
        println!("{}", outcome.reply);
        turns += 1;
    }

    pool.close().await;
    Ok(turns)
}

/// Replay of the persisted log shown when resuming a named session.
fn history_banner(entries: &[ChatLogEntry]) -> String {
    let mut lines = vec!["-- earlier in this session --".to_string()];
    lines.extend(entries.iter().map(|entry| format!("[{}] {}", entry.role.as_str(), entry.text)));
    lines.join("\n")
}

fn init_logging(config: &AppConfig) {
    use tally_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[cfg(test)]
mod tests {
    use tally_core::domain::session::TurnRole;
    use tally_db::repositories::ChatLogEntry;

    use super::history_banner;

    #[test]
    fn resumed_session_replays_log_in_arrival_order() {
        let entries = vec![
            ChatLogEntry {
                role: TurnRole::User,
                text: "我早上买了早餐".to_string(),
                logged_at: "2025-08-20T08:10:00Z".to_string(),
            },
            ChatLogEntry {
                role: TurnRole::Assistant,
                text: "多少钱呢？".to_string(),
                logged_at: "2025-08-20T08:10:01Z".to_string(),
            },
        ];

        let banner = history_banner(&entries);
        let lines: Vec<_> = banner.lines().collect();
        assert_eq!(lines[0], "-- earlier in this session --");
        assert_eq!(lines[1], "[user] 我早上买了早餐");
        assert_eq!(lines[2], "[assistant] 多少钱呢？");
    }
}
