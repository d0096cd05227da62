use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tally_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "TALLY_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "TALLY_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "TALLY_DATABASE_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "database.busy_timeout_ms",
        &config.database.busy_timeout_ms.to_string(),
        source("database.busy_timeout_ms", "TALLY_DATABASE_BUSY_TIMEOUT_MS"),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", "TALLY_LLM_PROVIDER"),
    ));
    lines.push(render_line("llm.model", &config.llm.model, source("llm.model", "TALLY_LLM_MODEL")));
    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
        source("llm.base_url", "TALLY_LLM_BASE_URL"),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line("llm.api_key", llm_api_key, source("llm.api_key", "TALLY_LLM_API_KEY")));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", "TALLY_LLM_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "retrieval.enabled",
        &config.retrieval.enabled.to_string(),
        source("retrieval.enabled", "TALLY_RETRIEVAL_ENABLED"),
    ));
    lines.push(render_line(
        "retrieval.base_url",
        config.retrieval.base_url.as_deref().unwrap_or("<unset>"),
        source("retrieval.base_url", "TALLY_RETRIEVAL_BASE_URL"),
    ));
    lines.push(render_line(
        "retrieval.top_k",
        &config.retrieval.top_k.to_string(),
        source("retrieval.top_k", "TALLY_RETRIEVAL_TOP_K"),
    ));

    lines.push(render_line(
        "ledger.default_currency",
        &config.ledger.default_currency,
        source("ledger.default_currency", "TALLY_LEDGER_DEFAULT_CURRENCY"),
    ));
    lines.push(render_line(
        "ledger.history_turns",
        &config.ledger.history_turns.to_string(),
        source("ledger.history_turns", "TALLY_LEDGER_HISTORY_TURNS"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "TALLY_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "TALLY_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("tally.toml");
    root.exists().then_some(root)
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
