//! Gmail credentials: a small capability trait and its factory.
//!
//! The rest of the crate only ever asks for a bearer token. Which provider
//! answers is decided once at startup by `create_auth_provider()`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::GmailConfig;
use crate::error::{ConfigError, MailError};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies a bearer token for Gmail API calls.
#[async_trait]
pub trait GmailAuthProvider: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, MailError>;
}

/// Used when Gmail is disabled. Every request fails with an auth error.
pub struct NoopAuthProvider;

#[async_trait]
impl GmailAuthProvider for NoopAuthProvider {
    async fn access_token(&self) -> Result<SecretString, MailError> {
        Err(MailError::AuthFailed(
            "Gmail is disabled (set GMAIL_ENABLED=true and provide OAuth credentials)".into(),
        ))
    }
}

/// A fixed token, for callers that obtained one elsewhere.
pub struct StaticTokenProvider(SecretString);

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

#[async_trait]
impl GmailAuthProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<SecretString, MailError> {
        Ok(self.0.clone())
    }
}

// ── OAuth refresh-token flow ────────────────────────────────────────

struct CachedToken {
    token: SecretString,
    refresh_after: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges a long-lived refresh token for short-lived access tokens,
/// caching each one until shortly before it expires.
pub struct RefreshTokenAuthProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl RefreshTokenAuthProvider {
    pub fn new(client_id: String, client_secret: SecretString, refresh_token: SecretString) -> Self {
        Self::with_token_url(GOOGLE_TOKEN_URL, client_id, client_secret, refresh_token)
    }

    pub fn with_token_url(
        token_url: impl Into<String>,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id,
            client_secret,
            refresh_token,
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Result<CachedToken, MailError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.expose_secret()),
        ];

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                MailError::Http {
                    status: status.as_u16(),
                    body,
                }
            } else {
                MailError::AuthFailed(format!("token refresh rejected ({status}): {body}"))
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::Malformed(format!("token response: {e}")))?;

        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        tracing::debug!(expires_in_secs = lifetime.as_secs(), "Refreshed Gmail access token");

        Ok(CachedToken {
            token: SecretString::from(parsed.access_token),
            refresh_after: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

#[async_trait]
impl GmailAuthProvider for RefreshTokenAuthProvider {
    async fn access_token(&self) -> Result<SecretString, MailError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref()
            && Instant::now() < entry.refresh_after
        {
            return Ok(entry.token.clone());
        }

        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Pick the auth provider for this run.
///
/// Disabled → `NoopAuthProvider`. Enabled with any credential missing is a
/// startup error.
pub fn create_auth_provider(config: &GmailConfig) -> Result<Arc<dyn GmailAuthProvider>, ConfigError> {
    if !config.enabled {
        tracing::info!("Gmail disabled, using no-op auth provider");
        return Ok(Arc::new(NoopAuthProvider));
    }

    let missing = |key: &str| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: "required when GMAIL_ENABLED=true".to_string(),
    };

    let client_id = config.client_id.clone().ok_or_else(|| missing("GMAIL_CLIENT_ID"))?;
    let client_secret = config
        .client_secret
        .clone()
        .ok_or_else(|| missing("GMAIL_CLIENT_SECRET"))?;
    let refresh_token = config
        .refresh_token
        .clone()
        .ok_or_else(|| missing("GMAIL_REFRESH_TOKEN"))?;

    tracing::info!("Gmail enabled, using refresh-token auth provider");
    Ok(Arc::new(RefreshTokenAuthProvider::new(
        client_id,
        client_secret,
        refresh_token,
    )))
}
