//! Run modes. Exactly one runs per process invocation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::config::Config;
use crate::embedding::{DisabledEmbedder, Embedder, OpenAiEmbedder};
use crate::error::{ConfigError, Result};
use crate::llm::create_provider;
use crate::mail::client::{MailSource, inbox_query};
use crate::mail::{GmailApiClient, create_auth_provider};
use crate::pipeline::{
    ContextAssembler, DraftRunReport, DraftRunRequest, DraftRunner, DraftService, IngestRequest,
    IngestionPipeline, IngestionReport,
};
use crate::retry::RetryExecutor;
use crate::store::{LibSqlBackend, RuleStore, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ingest,
    Draft,
    Diagnostics,
    Web,
    Rule,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Draft => "draft",
            Self::Diagnostics => "diagnostics",
            Self::Web => "web",
            Self::Rule => "rule",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ingest" => Ok(Self::Ingest),
            "draft" => Ok(Self::Draft),
            "diagnostics" | "diag" => Ok(Self::Diagnostics),
            "web" => Ok(Self::Web),
            "rule" => Ok(Self::Rule),
            other => Err(ConfigError::InvalidValue {
                key: "EMAIL_AGENT_MODE".into(),
                message: format!("unknown mode '{other}' (ingest, draft, diagnostics, web, rule)"),
            }),
        }
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

async fn open_store(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Arc<LibSqlBackend>> {
    Ok(Arc::new(LibSqlBackend::new_local(&config.database.path, embedder).await?))
}

fn mail_source(config: &Config) -> Result<Arc<dyn MailSource>> {
    let auth = create_auth_provider(&config.gmail)?;
    Ok(Arc::new(GmailApiClient::new(auth)))
}

fn embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(OpenAiEmbedder::new(&config.embedding)?))
}

// ── Modes ───────────────────────────────────────────────────────────

pub async fn run_ingest(config: &Config) -> Result<IngestionReport> {
    let store = open_store(config, embedder(config)?).await?;
    let pipeline = IngestionPipeline::new(mail_source(config)?, store, RetryExecutor::new(config.retry));
    let report = pipeline.ingest(&IngestRequest::from_config(&config.ingest)).await?;
    Ok(report)
}

pub async fn run_draft(config: &Config) -> Result<DraftRunReport> {
    let llm = create_provider(&config.llm.provider_config()?)?;
    let store = open_store(config, embedder(config)?).await?;
    let retry = RetryExecutor::new(config.retry);

    let assembler = ContextAssembler::new(store.clone(), store, config.search);
    let service = DraftService::new(assembler, llm, retry.clone());
    let runner = DraftRunner::new(mail_source(config)?, service, retry);

    let request = DraftRunRequest {
        query: inbox_query(config.runner.lookback_hours, false),
        max_messages: config.runner.max_messages,
    };
    Ok(runner.run(&request).await?)
}

/// Log configuration health without calling any model.
pub async fn run_diagnostics(config: &Config) -> Result<()> {
    let set = |present: bool| if present { "SET" } else { "MISSING" };

    info!(
        mode = %config.mode,
        llm_backend = config.llm.backend.as_str(),
        llm_model = %config.llm.model,
        embedding_model = %config.embedding.model,
        db_path = %config.database.path.display(),
        "Diagnostics"
    );
    info!(
        openai_api_key = set(config.llm.openai_api_key.is_some()),
        anthropic_api_key = set(config.llm.anthropic_api_key.is_some()),
        gmail_enabled = config.gmail.enabled,
        gmail_client_id = set(config.gmail.client_id.is_some()),
        gmail_client_secret = set(config.gmail.client_secret.is_some()),
        gmail_refresh_token = set(config.gmail.refresh_token.is_some()),
        "Credentials"
    );

    let embedder: Arc<dyn Embedder> = match OpenAiEmbedder::new(&config.embedding) {
        Ok(e) => Arc::new(e),
        Err(_) => Arc::new(DisabledEmbedder),
    };
    let store = open_store(config, embedder).await?;
    info!(
        chunks = store.count_documents().await?,
        business_rules = store.count_rules().await?,
        "Store contents"
    );
    Ok(())
}

pub async fn run_rule(config: &Config, key: &str, content: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "rule key".into(),
            message: "must not be blank".into(),
        }
        .into());
    }
    let store = open_store(config, Arc::new(DisabledEmbedder)).await?;
    store.upsert_rule(key.trim(), content, Utc::now()).await?;
    info!(rule_key = key.trim(), "Business rule saved");
    Ok(())
}
