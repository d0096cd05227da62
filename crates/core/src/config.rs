use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

/// Effective configuration. Precedence: defaults < `tally.toml` patch <
/// `TALLY_*` environment < programmatic overrides; validation runs last.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub top_k: usize,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub default_currency: String,
    pub history_turns: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub retrieval_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tally.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                busy_timeout_ms: 5000,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "qwen2.5".to_string(),
                timeout_secs: 30,
            },
            retrieval: RetrievalConfig {
                enabled: false,
                base_url: None,
                top_k: 5,
                timeout_secs: 10,
            },
            ledger: LedgerConfig { default_currency: "CNY".to_string(), history_turns: 6 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    retrieval: Option<RetrievalPatch>,
    ledger: Option<LedgerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrievalPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    top_k: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LedgerPatch {
    default_currency: Option<String>,
    history_turns: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => {
                let patch = read_patch(&path)?;
                config.apply_patch(patch);
            }
            None if options.require_file => {
                let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tally.toml"));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(busy_timeout_ms) = database.busy_timeout_ms {
                self.database.busy_timeout_ms = busy_timeout_ms;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(enabled) = retrieval.enabled {
                self.retrieval.enabled = enabled;
            }
            if let Some(base_url) = retrieval.base_url {
                self.retrieval.base_url = Some(base_url);
            }
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(timeout_secs) = retrieval.timeout_secs {
                self.retrieval.timeout_secs = timeout_secs;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(default_currency) = ledger.default_currency {
                self.ledger.default_currency = default_currency;
            }
            if let Some(history_turns) = ledger.history_turns {
                self.ledger.history_turns = history_turns;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TALLY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TALLY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TALLY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TALLY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TALLY_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TALLY_DATABASE_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_u64("TALLY_DATABASE_BUSY_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("TALLY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TALLY_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("TALLY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TALLY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TALLY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TALLY_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TALLY_RETRIEVAL_ENABLED") {
            self.retrieval.enabled = parse_bool("TALLY_RETRIEVAL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TALLY_RETRIEVAL_BASE_URL") {
            self.retrieval.base_url = Some(value);
        }
        if let Some(value) = read_env("TALLY_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_u32("TALLY_RETRIEVAL_TOP_K", &value)? as usize;
        }

        if let Some(value) = read_env("TALLY_LEDGER_DEFAULT_CURRENCY") {
            self.ledger.default_currency = value;
        }
        if let Some(value) = read_env("TALLY_LEDGER_HISTORY_TURNS") {
            self.ledger.history_turns = parse_u32("TALLY_LEDGER_HISTORY_TURNS", &value)? as usize;
        }

        if let Some(value) = read_env("TALLY_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("TALLY_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(llm_api_key.into());
        }
        if let Some(retrieval_enabled) = overrides.retrieval_enabled {
            self.retrieval.enabled = retrieval_enabled;
        }
    }

    /// Startup validation. A session can never begin without a usable
    /// inference backend, so that case is a fatal error rather than a
    /// degradable one.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.ledger.default_currency.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ledger.default_currency must not be empty".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
        }

        match self.llm.provider {
            LlmProvider::OpenAi if self.llm.api_key.is_none() => Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider; no inference backend available"
                    .to_string(),
            )),
            LlmProvider::Ollama if self.llm.base_url.is_none() => Err(ConfigError::Validation(
                "llm.base_url is required for the ollama provider".to_string(),
            )),
            _ => Ok(()),
        }?;

        if self.retrieval.enabled && self.retrieval.base_url.is_none() {
            return Err(ConfigError::Validation(
                "retrieval.base_url is required when retrieval is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("tally.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.into() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.into() })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.into() }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    fn options_with(overrides: ConfigOverrides) -> LoadOptions {
        LoadOptions { overrides, ..LoadOptions::default() }
    }

    #[test]
    fn defaults_validate_with_local_backend() {
        let config = AppConfig::load(LoadOptions::default()).expect("default config loads");
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.ledger.default_currency, "CNY");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn hosted_provider_without_api_key_is_fatal() {
        let result = AppConfig::load(options_with(ConfigOverrides {
            llm_provider: Some(LlmProvider::OpenAi),
            ..ConfigOverrides::default()
        }));

        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn hosted_provider_with_api_key_passes() {
        let config = AppConfig::load(options_with(ConfigOverrides {
            llm_provider: Some(LlmProvider::OpenAi),
            llm_api_key: Some("sk-test".to_string()),
            ..ConfigOverrides::default()
        }))
        .expect("config with key loads");
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
    }

    #[test]
    fn toml_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[database]\nurl = \"sqlite::memory:\"\nbusy_timeout_ms = 250\n\n\
             [ledger]\ndefault_currency = \"USD\"\n"
        )
        .expect("write patch");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            ..LoadOptions::default()
        })
        .expect("patched config loads");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.ledger.default_currency, "USD");
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn provider_parses_from_str() {
        assert_eq!("openai".parse::<LlmProvider>().ok(), Some(LlmProvider::OpenAi));
        assert_eq!("Ollama".parse::<LlmProvider>().ok(), Some(LlmProvider::Ollama));
        assert!("gpt".parse::<LlmProvider>().is_err());
    }
}
