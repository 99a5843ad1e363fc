//! Mail-source data types for listings, pages and full messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry from a mailbox listing: headers and snippet, no body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub message_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub snippet: String,
    /// `None` when the mail source did not report an arrival time.
    pub received_at: Option<DateTime<Utc>>,
}

/// One page of a mailbox listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessageSummary>,
    pub next_page_token: Option<String>,
}

impl MessagePage {
    pub fn has_more(&self) -> bool {
        self.next_page_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

/// A full message as fetched from the mail source.
///
/// `body` is the undecorated body text (plain part preferred, HTML part
/// otherwise); callers run it through `text::clean()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub message_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub received_at: Option<DateTime<Utc>>,
    pub snippet: String,
    pub body: String,
}

impl RawMessage {
    /// Listing view of this message.
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            message_id: self.message_id.clone(),
            thread_id: self.thread_id.clone(),
            subject: self.subject.clone(),
            from: self.from.clone(),
            snippet: self.snippet.clone(),
            received_at: self.received_at,
        }
    }
}

/// Anything the draft selector can group by thread and order by arrival.
pub trait ThreadedMessage {
    fn thread_id(&self) -> &str;
    fn received_at(&self) -> Option<DateTime<Utc>>;
}

impl ThreadedMessage for MessageSummary {
    fn thread_id(&self) -> &str {
        &self.thread_id
    }

    fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }
}

impl ThreadedMessage for RawMessage {
    fn thread_id(&self) -> &str {
        &self.thread_id
    }

    fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }
}
