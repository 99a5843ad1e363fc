//! Ingest and draft pipelines.
//!
//! Ingest: `MailSource` pages → `text::clean` → `text::split_into_chunks`
//! → `VectorStore::add`, skipping messages already indexed.
//!
//! Draft: list recent mail → `select_latest_per_thread` → `ContextAssembler`
//! → `prompt::compose` → `LlmProvider` → `MailSource::create_reply_draft`.
//!
//! Replies are only ever saved as drafts.

pub mod context;
pub mod drafter;
pub mod ingest;
pub mod prompt;
pub mod selector;

pub use context::{ContextAssembler, ContextItem, EmailContext};
pub use drafter::{DraftRunReport, DraftRunRequest, DraftRunner, DraftService, EmailDraft};
pub use ingest::{IngestRequest, IngestionPipeline, IngestionReport};
pub use prompt::{PromptParts, compose};
pub use selector::select_latest_per_thread;
