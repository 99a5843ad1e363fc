//! Gmail REST implementation of `MailSource`.
//!
//! Talks to `gmail/v1/users/me/...` with a bearer token from the configured
//! `GmailAuthProvider`. Bodies are pulled as `format=raw` and parsed with
//! mail-parser; drafts are posted as a plain RFC 822 header block plus body.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::MailError;
use crate::mail::auth::GmailAuthProvider;
use crate::mail::client::MailSource;
use crate::mail::types::{MessagePage, MessageSummary, RawMessage};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResource {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    internal_date: Option<String>,
    raw: Option<String>,
    payload: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ThreadResource {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct DraftResource {
    id: String,
}

impl MessageResource {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn received_at(&self) -> Option<DateTime<Utc>> {
        parse_internal_date(self.internal_date.as_deref()?)
    }
}

// ── Client ──────────────────────────────────────────────────────────

pub struct GmailApiClient {
    http: reqwest::Client,
    auth: Arc<dyn GmailAuthProvider>,
    base_url: String,
}

impl GmailApiClient {
    pub fn new(auth: Arc<dyn GmailAuthProvider>) -> Self {
        Self::with_base_url(auth, GMAIL_API_BASE)
    }

    /// Point the client at a different API root (local fakes in tests).
    pub fn with_base_url(auth: Arc<dyn GmailAuthProvider>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, MailError> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .bearer_auth(token.expose_secret())
            .query(query)
            .send()
            .await?;
        decode(response, path).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T, MailError> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await?;
        decode(response, path).await
    }

    async fn fetch_metadata(&self, message_id: &str) -> Result<MessageResource, MailError> {
        self.get(
            &format!("messages/{message_id}"),
            &[
                ("format", "metadata"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Message-ID"),
            ],
        )
        .await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> Result<T, MailError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match status.as_u16() {
            401 | 403 => MailError::AuthFailed(format!("{path}: HTTP {status}: {body}")),
            code => MailError::Http { status: code, body },
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| MailError::Malformed(format!("{path}: {e}")))
}

#[async_trait]
impl MailSource for GmailApiClient {
    async fn list_messages(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, MailError> {
        let max = max_results.max(1).to_string();
        let mut params = vec![("q", query), ("maxResults", max.as_str())];
        if let Some(token) = page_token.filter(|t| !t.trim().is_empty()) {
            params.push(("pageToken", token));
        }

        let listing: ListResponse = self.get("messages", &params).await?;

        let mut messages = Vec::with_capacity(listing.messages.len());
        for entry in listing.messages {
            // A failed metadata fetch degrades to an id-only summary.
            let meta = match self.fetch_metadata(&entry.id).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(
                        message_id = %entry.id,
                        thread_id = %entry.thread_id,
                        error = %e,
                        "Metadata fetch failed, listing id only"
                    );
                    messages.push(MessageSummary {
                        message_id: entry.id,
                        thread_id: entry.thread_id,
                        ..Default::default()
                    });
                    continue;
                }
            };
            messages.push(MessageSummary {
                subject: meta.header("Subject").unwrap_or_default().to_string(),
                from: meta.header("From").unwrap_or_default().to_string(),
                snippet: meta.snippet.clone(),
                received_at: meta.received_at(),
                thread_id: if meta.thread_id.is_empty() {
                    entry.thread_id
                } else {
                    meta.thread_id
                },
                message_id: entry.id,
            });
        }

        tracing::debug!(query, count = messages.len(), "Listed Gmail messages");
        Ok(MessagePage {
            messages,
            next_page_token: listing.next_page_token,
        })
    }

    async fn fetch_message_content(&self, message_id: &str) -> Result<RawMessage, MailError> {
        let resource: MessageResource = self
            .get(&format!("messages/{message_id}"), &[("format", "raw")])
            .await?;

        let raw = resource
            .raw
            .as_deref()
            .ok_or_else(|| MailError::Malformed(format!("message {message_id} has no raw payload")))?;
        let bytes = decode_base64url(raw)?;
        let parsed = parse_rfc822(&bytes);

        Ok(RawMessage {
            message_id: resource.id.clone(),
            thread_id: resource.thread_id.clone(),
            subject: parsed.subject,
            from: parsed.from,
            received_at: resource.received_at(),
            snippet: resource.snippet,
            body: parsed.body,
        })
    }

    async fn fetch_thread_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>, MailError> {
        let thread: ThreadResource = self
            .get(&format!("threads/{thread_id}"), &[("format", "minimal")])
            .await?;

        let mut messages = Vec::with_capacity(thread.messages.len());
        for entry in thread.messages {
            messages.push(self.fetch_message_content(&entry.id).await?);
        }
        Ok(messages)
    }

    async fn create_reply_draft(
        &self,
        message_id: &str,
        thread_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MailError> {
        // Threading headers are optional; a draft without them still lands
        // in the right thread via threadId.
        let rfc_message_id = match self.fetch_metadata(message_id).await {
            Ok(meta) => meta.header("Message-ID").map(str::to_string),
            Err(e) => {
                tracing::debug!(message_id, error = %e, "No Message-ID header for reply draft");
                None
            }
        };

        let payload = build_reply_payload(subject, body, rfc_message_id.as_deref());
        let request = serde_json::json!({
            "message": {
                "raw": URL_SAFE_NO_PAD.encode(payload.as_bytes()),
                "threadId": thread_id,
            }
        });

        let draft: DraftResource = self.post("drafts", &request).await?;
        tracing::info!(message_id, thread_id, draft_id = %draft.id, "Created Gmail reply draft");
        Ok(draft.id)
    }
}

// ── Payload helpers ─────────────────────────────────────────────────

struct ParsedMail {
    subject: String,
    from: String,
    body: String,
}

/// Pull subject, sender and body text out of an RFC 822 message.
/// Prefers the plain-text part and falls back to the HTML part.
fn parse_rfc822(bytes: &[u8]) -> ParsedMail {
    let Some(message) = MessageParser::default().parse(bytes) else {
        return ParsedMail {
            subject: String::new(),
            from: String::new(),
            body: String::from_utf8_lossy(bytes).into_owned(),
        };
    };

    let from = message
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();

    let body = message
        .body_text(0)
        .or_else(|| message.body_html(0))
        .map(|b| b.into_owned())
        .unwrap_or_default();

    ParsedMail {
        subject: message.subject().unwrap_or_default().to_string(),
        from,
        body,
    }
}

fn decode_base64url(data: &str) -> Result<Vec<u8>, MailError> {
    URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .map_err(|e| MailError::Malformed(format!("base64url payload: {e}")))
}

/// Gmail's `internalDate` is epoch milliseconds as a string.
fn parse_internal_date(value: &str) -> Option<DateTime<Utc>> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Header block + body for a reply draft. Not multipart.
fn build_reply_payload(subject: &str, body: &str, in_reply_to: Option<&str>) -> String {
    let mut payload = String::new();
    if let Some(id) = in_reply_to.filter(|id| !id.trim().is_empty()) {
        payload.push_str(&format!("In-Reply-To: {id}\r\n"));
        payload.push_str(&format!("References: {id}\r\n"));
    }
    payload.push_str(&format!("Subject: {}\r\n", subject.replace(['\r', '\n'], " ")));
    payload.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    payload.push_str("\r\n");
    payload.push_str(body);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_date_parses_millis() {
        let dt = parse_internal_date("1700000000000").unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert!(parse_internal_date("soon").is_none());
    }

    #[test]
    fn base64url_accepts_padding() {
        let encoded = URL_SAFE_NO_PAD.encode(b"hello?>");
        assert_eq!(decode_base64url(&encoded).unwrap(), b"hello?>");
        assert_eq!(decode_base64url(&format!("{encoded}=")).unwrap(), b"hello?>");
        assert!(decode_base64url("***").is_err());
    }

    #[test]
    fn rfc822_prefers_plain_text() {
        let raw = "From: Alice <alice@example.com>\r\n\
                   Subject: Pricing\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   What is the price?\r\n";
        let parsed = parse_rfc822(raw.as_bytes());
        assert_eq!(parsed.subject, "Pricing");
        assert_eq!(parsed.from, "Alice <alice@example.com>");
        assert!(parsed.body.contains("What is the price?"));
    }

    #[test]
    fn rfc822_falls_back_to_html() {
        let raw = "From: bob@example.com\r\n\
                   Subject: Hi\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <div>Hello <b>there</b></div>\r\n";
        let parsed = parse_rfc822(raw.as_bytes());
        assert_eq!(parsed.from, "bob@example.com");
        assert!(parsed.body.contains("Hello"));
    }

    #[test]
    fn reply_payload_headers() {
        let payload = build_reply_payload("Re: Pricing", "Thanks!", Some("<abc@mail>"));
        assert!(payload.starts_with("In-Reply-To: <abc@mail>\r\nReferences: <abc@mail>\r\n"));
        assert!(payload.contains("Subject: Re: Pricing\r\n"));
        assert!(payload.ends_with("\r\n\r\nThanks!"));

        let bare = build_reply_payload("Re:\nInjected", "x", None);
        assert!(!bare.contains("In-Reply-To"));
        assert!(bare.contains("Subject: Re: Injected\r\n"));
    }

    #[test]
    fn metadata_header_lookup_is_case_insensitive() {
        let resource = MessageResource {
            id: "m".into(),
            payload: Some(Payload {
                headers: vec![Header {
                    name: "subject".into(),
                    value: "Hello".into(),
                }],
            }),
            ..Default::default()
        };
        assert_eq!(resource.header("Subject"), Some("Hello"));
        assert_eq!(resource.header("From"), None);
    }

    // ── Against a local fake of the REST API ────────────────────────

    use crate::mail::auth::StaticTokenProvider;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer test-token")
    }

    async fn fake_gmail(posted: Arc<Mutex<Vec<serde_json::Value>>>) -> String {
        let app = Router::new()
            .route(
                "/messages",
                get(|headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
                    }
                    if q.get("q").map(String::as_str) == Some("boom") {
                        return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "messages": [
                                {"id": "m1", "threadId": "t1"},
                                {"id": "gone", "threadId": "t2"}
                            ],
                            "nextPageToken": "p2"
                        })),
                    )
                }),
            )
            .route(
                "/messages/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "gone" {
                        return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "not found"})));
                    }
                    (StatusCode::OK, Json(serde_json::json!({
                        "id": id,
                        "threadId": "t1",
                        "snippet": "What is the price?",
                        "internalDate": "1700000000000",
                        "payload": {"headers": [
                            {"name": "Subject", "value": "Pricing"},
                            {"name": "From", "value": "alice@example.com"},
                            {"name": "Message-ID", "value": "<abc@mail>"}
                        ]}
                    })))
                }),
            )
            .route(
                "/drafts",
                post(move |Json(body): Json<serde_json::Value>| {
                    let posted = posted.clone();
                    async move {
                        posted.lock().unwrap().push(body);
                        Json(serde_json::json!({"id": "d1"}))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> GmailApiClient {
        GmailApiClient::with_base_url(Arc::new(StaticTokenProvider::new("test-token")), base)
    }

    #[tokio::test]
    async fn list_fills_summaries_from_metadata() {
        let base = fake_gmail(Arc::new(Mutex::new(Vec::new()))).await;
        let page = client(&base).list_messages("in:inbox", 10, None).await.unwrap();

        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
        assert_eq!(page.messages.len(), 2);
        let summary = &page.messages[0];
        assert_eq!(summary.message_id, "m1");
        assert_eq!(summary.thread_id, "t1");
        assert_eq!(summary.subject, "Pricing");
        assert_eq!(summary.from, "alice@example.com");
        assert_eq!(summary.received_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn missing_message_metadata_keeps_rest_of_page() {
        let base = fake_gmail(Arc::new(Mutex::new(Vec::new()))).await;
        let page = client(&base).list_messages("in:inbox", 10, None).await.unwrap();

        let ids: Vec<&str> = page.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "gone"]);
        let gone = &page.messages[1];
        assert_eq!(gone.thread_id, "t2");
        assert!(gone.subject.is_empty());
        assert!(gone.received_at.is_none());
    }

    #[tokio::test]
    async fn server_errors_keep_status() {
        let base = fake_gmail(Arc::new(Mutex::new(Vec::new()))).await;
        let err = client(&base).list_messages("boom", 10, None).await.unwrap_err();
        assert!(matches!(err, MailError::Http { status: 503, .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn wrong_token_is_auth_failure() {
        let base = fake_gmail(Arc::new(Mutex::new(Vec::new()))).await;
        let bad = GmailApiClient::with_base_url(Arc::new(StaticTokenProvider::new("nope")), &base);
        let err = bad.list_messages("in:inbox", 10, None).await.unwrap_err();
        assert!(matches!(err, MailError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn reply_draft_is_threaded() {
        let posted = Arc::new(Mutex::new(Vec::new()));
        let base = fake_gmail(posted.clone()).await;

        let id = client(&base)
            .create_reply_draft("m1", "t1", "Re: Pricing", "It is $12.")
            .await
            .unwrap();
        assert_eq!(id, "d1");

        let posted = posted.lock().unwrap();
        let message = &posted[0]["message"];
        assert_eq!(message["threadId"], "t1");
        let raw = decode_base64url(message["raw"].as_str().unwrap()).unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.contains("In-Reply-To: <abc@mail>"));
        assert!(text.ends_with("It is $12."));
    }
}
