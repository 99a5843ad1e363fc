//! Error types for the email agent.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Embedding step failed")]
    Embedding(#[source] EmbeddingError),
}

/// Mail source errors (Gmail REST, OAuth).
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail authentication failed: {0}")]
    AuthFailed(String),

    #[error("Mail API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Mail transport error: {0}")]
    Transport(String),

    #[error("Malformed mail payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for MailError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest's Display omits the underlying cause.
        Self::Transport(error_chain_text(&e))
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Embedding endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("Embedding API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        Self::RequestFailed(error_chain_text(&e))
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Listing messages failed: {0}")]
    Listing(#[source] MailError),

    #[error("Draft generation failed: {0}")]
    Draft(#[from] LlmError),

    #[error("Context assembly failed: {0}")]
    Context(#[source] DatabaseError),
}

/// Render an error and every `source()` below it as one line.
pub fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        current = cause.source();
    }
    text
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
