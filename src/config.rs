//! Configuration types, read once from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::retry::RetryPolicy;

/// Everything the binary needs, grouped by subsystem.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mode name from `EMAIL_AGENT_MODE` (a CLI argument takes precedence).
    pub mode: String,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub gmail: GmailConfig,
    pub ingest: IngestConfig,
    pub runner: RunnerConfig,
    pub retry: RetryPolicy,
    pub llm: LlmSettings,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for the daily-rolling log file. Stdout only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Gmail OAuth settings. Credentials are only required when `enabled`.
#[derive(Debug, Clone, Default)]
pub struct GmailConfig {
    pub enabled: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
}

/// Bulk ingestion limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// `0` disables the `newer_than` filter.
    pub lookback_hours: u32,
    pub max_messages: usize,
    pub page_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Keep own messages in the ingest query.
    pub include_sent: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            max_messages: 200,
            page_size: 50,
            chunk_size: 1200,
            chunk_overlap: 200,
            include_sent: false,
        }
    }
}

/// Draft-run limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub lookback_hours: u32,
    pub max_messages: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 1,
            max_messages: 50,
        }
    }
}

/// Model selection plus whichever API keys are present.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub model: String,
    pub openai_api_key: Option<SecretString>,
    pub anthropic_api_key: Option<SecretString>,
}

impl LlmSettings {
    /// Provider config for the selected backend; fails when its key is missing.
    pub fn provider_config(&self) -> Result<LlmConfig, ConfigError> {
        let (key, var) = match self.backend {
            LlmBackend::OpenAi => (&self.openai_api_key, "OPENAI_API_KEY"),
            LlmBackend::Anthropic => (&self.anthropic_api_key, "ANTHROPIC_API_KEY"),
        };
        let api_key = key
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))?;
        Ok(LlmConfig {
            backend: self.backend,
            api_key,
            model: self.model.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub timeout: Duration,
}

/// Similarity search policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            similarity_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
}

impl Config {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let backend = match env.string("LLM_BACKEND", "openai").to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAi,
            "anthropic" => LlmBackend::Anthropic,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_BACKEND".into(),
                    message: format!("expected 'openai' or 'anthropic', got '{other}'"),
                });
            }
        };

        let openai_api_key = env.secret("OPENAI_API_KEY");

        Ok(Self {
            mode: env.string("EMAIL_AGENT_MODE", "draft"),
            database: DatabaseConfig {
                path: PathBuf::from(env.string("EMAIL_AGENT_DB_PATH", "./data/email-agent.db")),
            },
            logging: LoggingConfig {
                log_dir: env.optional("EMAIL_AGENT_LOG_DIR").map(PathBuf::from),
            },
            gmail: GmailConfig {
                enabled: env.parse("GMAIL_ENABLED", false)?,
                client_id: env.optional("GMAIL_CLIENT_ID"),
                client_secret: env.secret("GMAIL_CLIENT_SECRET"),
                refresh_token: env.secret("GMAIL_REFRESH_TOKEN"),
            },
            ingest: IngestConfig {
                lookback_hours: env.parse("INGEST_LOOKBACK_HOURS", 24)?,
                max_messages: env.parse::<usize>("INGEST_MAX_MESSAGES", 200)?.max(1),
                page_size: env.parse::<usize>("INGEST_PAGE_SIZE", 50)?.max(1),
                chunk_size: env.parse::<usize>("INGEST_CHUNK_SIZE", 1200)?.max(1),
                chunk_overlap: env.parse("INGEST_CHUNK_OVERLAP", 200)?,
                include_sent: env.parse("INGEST_INCLUDE_SENT", false)?,
            },
            runner: RunnerConfig {
                lookback_hours: env.parse::<u32>("RUNNER_LOOKBACK_HOURS", 1)?.max(1),
                max_messages: env.parse::<usize>("RUNNER_MAX_MESSAGES", 50)?.max(1),
            },
            retry: RetryPolicy::new(
                env.parse("RETRY_MAX_ATTEMPTS", 3)?,
                Duration::from_millis(env.parse("RETRY_INITIAL_BACKOFF_MS", 3000)?),
            ),
            llm: LlmSettings {
                backend,
                model: env.string("LLM_MODEL", "gpt-4o-mini"),
                openai_api_key: openai_api_key.clone(),
                anthropic_api_key: env.secret("ANTHROPIC_API_KEY"),
            },
            embedding: EmbeddingConfig {
                model: env.string("EMBEDDING_MODEL", "text-embedding-3-small"),
                api_key: openai_api_key,
                base_url: env.string("OPENAI_BASE_URL", "https://api.openai.com"),
                timeout: Duration::from_secs(env.parse("EMBEDDING_TIMEOUT_SECS", 30)?),
            },
            search: SearchConfig {
                top_k: env.parse::<usize>("SEARCH_TOP_K", 4)?.max(1),
                similarity_threshold: env.parse("SEARCH_SIMILARITY_THRESHOLD", 0.0)?,
            },
            web: WebConfig {
                port: env.parse("WEB_PORT", 8080)?,
            },
        })
    }
}

// ── Lookup helpers ──────────────────────────────────────────────────

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Value with surrounding whitespace removed; blank counts as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn secret(&self, key: &str) -> Option<SecretString> {
        self.optional(key).map(SecretString::from)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.mode, "draft");
        assert_eq!(config.database.path, PathBuf::from("./data/email-agent.db"));
        assert!(config.logging.log_dir.is_none());
        assert!(!config.gmail.enabled);
        assert_eq!(config.ingest, IngestConfig::default());
        assert_eq!(config.runner, RunnerConfig::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.llm.backend, LlmBackend::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.search, SearchConfig::default());
        assert_eq!(config.web.port, 8080);
    }

    #[test]
    fn overrides_and_floors() {
        let config = config_from(&[
            ("EMAIL_AGENT_MODE", "ingest"),
            ("INGEST_PAGE_SIZE", "0"),
            ("INGEST_CHUNK_OVERLAP", "0"),
            ("RUNNER_LOOKBACK_HOURS", "0"),
            ("RETRY_MAX_ATTEMPTS", "0"),
            ("GMAIL_ENABLED", "true"),
            ("LLM_BACKEND", "Anthropic"),
        ])
        .unwrap();
        assert_eq!(config.mode, "ingest");
        assert_eq!(config.ingest.page_size, 1);
        assert_eq!(config.ingest.chunk_overlap, 0);
        assert_eq!(config.runner.lookback_hours, 1);
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.gmail.enabled);
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = config_from(&[("INGEST_MAX_MESSAGES", "lots")]).unwrap_err();
        assert!(err.to_string().contains("INGEST_MAX_MESSAGES"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(config_from(&[("LLM_BACKEND", "llama")]).is_err());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[("OPENAI_API_KEY", "  "), ("LLM_MODEL", "")]).unwrap();
        assert!(config.llm.openai_api_key.is_none());
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn provider_config_requires_backend_key() {
        let config = config_from(&[("ANTHROPIC_API_KEY", "sk-ant")]).unwrap();
        let err = config.llm.provider_config().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let config = config_from(&[("LLM_BACKEND", "anthropic"), ("ANTHROPIC_API_KEY", "sk-ant")]).unwrap();
        let llm = config.llm.provider_config().unwrap();
        assert_eq!(llm.api_key.expose_secret(), "sk-ant");
    }
}
