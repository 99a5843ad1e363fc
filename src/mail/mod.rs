//! Mailbox access: the `MailSource` seam, Gmail auth and the Gmail client.

pub mod auth;
pub mod client;
pub mod gmail;
pub mod types;

pub use auth::{GmailAuthProvider, NoopAuthProvider, RefreshTokenAuthProvider, create_auth_provider};
pub use client::{MailSource, inbox_query};
pub use gmail::GmailApiClient;
pub use types::{MessagePage, MessageSummary, RawMessage, ThreadedMessage};
