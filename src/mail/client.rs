//! Mail source abstraction.

use async_trait::async_trait;

use crate::error::MailError;
use crate::mail::types::{MessagePage, RawMessage};

/// Read/draft access to a mailbox.
///
/// Implementations talk to a remote service; every call may fail with a
/// transient `MailError`, so callers wrap them in a `RetryExecutor`.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// One page of messages matching `query`.
    async fn list_messages(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, MailError>;

    /// Full message including body text.
    async fn fetch_message_content(&self, message_id: &str) -> Result<RawMessage, MailError>;

    /// Every message in a thread, oldest first.
    async fn fetch_thread_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>, MailError>;

    /// Save a reply draft in the mailbox. Returns the draft id.
    async fn create_reply_draft(
        &self,
        message_id: &str,
        thread_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MailError>;
}

/// Inbox search query: `in:inbox`, minus own mail unless `include_sent`,
/// limited to the last `lookback_hours` when non-zero.
pub fn inbox_query(lookback_hours: u32, include_sent: bool) -> String {
    let mut query = String::from("in:inbox");
    if !include_sent {
        query.push_str(" -from:me");
    }
    if lookback_hours > 0 {
        query.push_str(&format!(" newer_than:{lookback_hours}h"));
    }
    query
}
