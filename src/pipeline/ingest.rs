//! Bulk ingestion: mailbox pages → cleaned text → chunks → vector store.
//!
//! Ingestion is idempotent per message id. Messages already present in the
//! store are skipped before their body is fetched, and a failure on one
//! message never aborts the run.

use std::sync::Arc;

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{MailError, PipelineError, error_chain_text};
use crate::mail::client::{MailSource, inbox_query};
use crate::mail::types::{MessageSummary, RawMessage};
use crate::retry::RetryExecutor;
use crate::store::{DocumentMetadata, StoredDocument, VectorStore};
use crate::text;

/// Parameters for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub query: String,
    pub max_messages: usize,
    pub page_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IngestRequest {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            query: inbox_query(config.lookback_hours, config.include_sent),
            max_messages: config.max_messages,
            page_size: config.page_size,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// Outcome counts. `inserted` counts messages, not chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub processed: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Inserted(usize),
    Skipped(&'static str),
}

#[derive(Debug, thiserror::Error)]
enum ItemError {
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error(transparent)]
    Store(#[from] crate::error::DatabaseError),
}

pub struct IngestionPipeline {
    mail: Arc<dyn MailSource>,
    store: Arc<dyn VectorStore>,
    retry: RetryExecutor,
}

impl IngestionPipeline {
    pub fn new(mail: Arc<dyn MailSource>, store: Arc<dyn VectorStore>, retry: RetryExecutor) -> Self {
        Self { mail, store, retry }
    }

    /// Page through the mailbox and index every new message.
    ///
    /// Only a failed page listing aborts the run; per-message failures are
    /// logged and counted.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestionReport, PipelineError> {
        let mut report = IngestionReport::default();
        let mut page_token: Option<String> = None;
        let page_size = request.page_size.max(1);

        info!(
            query = %request.query,
            max_messages = request.max_messages,
            "Starting ingestion"
        );

        while report.processed < request.max_messages {
            let batch = page_size.min(request.max_messages - report.processed);
            let token = page_token.clone();
            let page = self
                .retry
                .execute("mail.list_messages", || {
                    self.mail.list_messages(&request.query, batch, token.as_deref())
                })
                .await
                .map_err(PipelineError::Listing)?;

            if page.messages.is_empty() {
                break;
            }

            for summary in &page.messages {
                if report.processed >= request.max_messages {
                    break;
                }
                report.processed += 1;

                match self.ingest_one(summary, request).await {
                    Ok(Outcome::Inserted(chunks)) => {
                        report.inserted += 1;
                        debug!(message_id = %summary.message_id, chunks, "Message indexed");
                    }
                    Ok(Outcome::Skipped(reason)) => {
                        report.skipped += 1;
                        debug!(message_id = %summary.message_id, reason, "Message skipped");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            message_id = %summary.message_id,
                            thread_id = %summary.thread_id,
                            error = %error_chain_text(&e),
                            "Failed to ingest message"
                        );
                    }
                }
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        info!(
            processed = report.processed,
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed,
            "Ingestion finished"
        );
        Ok(report)
    }

    async fn ingest_one(
        &self,
        summary: &MessageSummary,
        request: &IngestRequest,
    ) -> Result<Outcome, ItemError> {
        let message_id = summary.message_id.trim();
        if message_id.is_empty() {
            return Ok(Outcome::Skipped("blank message id"));
        }
        if self.store.exists_by_message_id(message_id).await? {
            return Ok(Outcome::Skipped("already indexed"));
        }

        let raw = self
            .retry
            .execute("mail.fetch_message_content", || {
                self.mail.fetch_message_content(message_id)
            })
            .await?;

        let body = text::clean(&raw.body);
        if body.is_empty() {
            return Ok(Outcome::Skipped("empty body"));
        }

        let documents = build_documents(&raw, &body, request.chunk_size, request.chunk_overlap);
        if documents.is_empty() {
            return Ok(Outcome::Skipped("no chunks"));
        }

        let count = documents.len();
        self.retry
            .execute("store.add", || self.store.add(&documents))
            .await?;
        Ok(Outcome::Inserted(count))
    }
}

/// One stored document per chunk, all sharing the message's metadata.
fn build_documents(
    raw: &RawMessage,
    body: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<StoredDocument> {
    let received_at = raw
        .received_at
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    text::split_into_chunks(body, chunk_size, chunk_overlap)
        .into_iter()
        .map(|chunk| {
            StoredDocument::new(
                chunk.text,
                DocumentMetadata {
                    message_id: raw.message_id.clone(),
                    thread_id: raw.thread_id.clone(),
                    subject: raw.subject.clone(),
                    from: raw.from.clone(),
                    received_at: received_at.clone(),
                    snippet: raw.snippet.clone(),
                    chunk_index: chunk.index,
                    total_chunks: chunk.total,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::error::EmbeddingError;
    use crate::mail::types::MessagePage;
    use crate::retry::{RetryPolicy, Sleeper};
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _delay: Duration) -> Result<(), crate::retry::Interrupted> {
            Ok(())
        }
    }

    /// Serves pages of `page_len` from a fixed list of messages.
    struct FakeMailbox {
        messages: Vec<RawMessage>,
        page_len: usize,
        list_calls: AtomicU32,
        fetch_failures: Mutex<HashMap<String, u32>>,
        fail_listing: bool,
    }

    impl FakeMailbox {
        fn new(messages: Vec<RawMessage>, page_len: usize) -> Self {
            Self {
                messages,
                page_len,
                list_calls: AtomicU32::new(0),
                fetch_failures: Mutex::new(HashMap::new()),
                fail_listing: false,
            }
        }

        fn failing_fetch(self, id: &str, times: u32) -> Self {
            self.fetch_failures.lock().unwrap().insert(id.to_string(), times);
            self
        }
    }

    #[async_trait]
    impl MailSource for FakeMailbox {
        async fn list_messages(
            &self,
            _query: &str,
            max_results: usize,
            page_token: Option<&str>,
        ) -> Result<MessagePage, MailError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing {
                return Err(MailError::Http { status: 400, body: "bad query".into() });
            }
            let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let end = (start + self.page_len.min(max_results)).min(self.messages.len());
            let messages = self.messages[start..end].iter().map(RawMessage::summary).collect();
            let next_page_token = (end < self.messages.len()).then(|| end.to_string());
            Ok(MessagePage { messages, next_page_token })
        }

        async fn fetch_message_content(&self, message_id: &str) -> Result<RawMessage, MailError> {
            if let Some(left) = self.fetch_failures.lock().unwrap().get_mut(message_id)
                && *left > 0
            {
                *left -= 1;
                return Err(MailError::Transport("connection reset by peer".into()));
            }
            self.messages
                .iter()
                .find(|m| m.message_id == message_id)
                .cloned()
                .ok_or_else(|| MailError::Http { status: 404, body: "not found".into() })
        }

        async fn fetch_thread_messages(&self, _thread_id: &str) -> Result<Vec<RawMessage>, MailError> {
            Ok(Vec::new())
        }

        async fn create_reply_draft(
            &self,
            _message_id: &str,
            _thread_id: &str,
            _subject: &str,
            _body: &str,
        ) -> Result<String, MailError> {
            Ok("draft".into())
        }
    }

    fn raw(id: &str, body: &str) -> RawMessage {
        RawMessage {
            message_id: id.into(),
            thread_id: format!("thread-{id}"),
            subject: format!("Subject {id}"),
            body: body.into(),
            ..Default::default()
        }
    }

    fn request(max_messages: usize) -> IngestRequest {
        IngestRequest {
            query: "in:inbox".into(),
            max_messages,
            page_size: 2,
            chunk_size: 1200,
            chunk_overlap: 200,
        }
    }

    async fn pipeline(mail: FakeMailbox) -> (Arc<FakeMailbox>, Arc<LibSqlBackend>, IngestionPipeline) {
        let mail = Arc::new(mail);
        let store = Arc::new(LibSqlBackend::new_memory(Arc::new(UnitEmbedder)).await.unwrap());
        let retry = RetryExecutor::with_sleeper(
            RetryPolicy::new(3, Duration::from_millis(1)),
            Arc::new(NoSleep),
        );
        let pipeline = IngestionPipeline::new(mail.clone(), store.clone(), retry);
        (mail, store, pipeline)
    }

    #[tokio::test]
    async fn ingest_pages_and_counts() {
        let mailbox = FakeMailbox::new(
            vec![raw("m1", "Hello there"), raw("m2", "   "), raw("m3", "Price question")],
            2,
        );
        let (mail, store, pipeline) = pipeline(mailbox).await;

        let report = pipeline.ingest(&request(10)).await.unwrap();

        assert_eq!(
            report,
            IngestionReport { processed: 3, inserted: 2, skipped: 1, failed: 0 }
        );
        assert_eq!(mail.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.count_documents().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_run_skips_everything() {
        let mailbox = FakeMailbox::new(vec![raw("m1", "Hello"), raw("m2", "World")], 5);
        let (_mail, store, pipeline) = pipeline(mailbox).await;

        pipeline.ingest(&request(10)).await.unwrap();
        let again = pipeline.ingest(&request(10)).await.unwrap();

        assert_eq!(again.inserted, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(store.count_documents().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn max_messages_caps_processing() {
        let messages = (0..5).map(|i| raw(&format!("m{i}"), "body")).collect();
        let (_mail, _store, pipeline) = pipeline(FakeMailbox::new(messages, 2)).await;

        let report = pipeline.ingest(&request(3)).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.inserted, 3);
    }

    #[tokio::test]
    async fn transient_fetch_failure_is_retried() {
        let mailbox = FakeMailbox::new(vec![raw("m1", "Hello")], 5).failing_fetch("m1", 2);
        let (_mail, _store, pipeline) = pipeline(mailbox).await;

        let report = pipeline.ingest(&request(10)).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn persistent_failure_is_counted_not_fatal() {
        let mailbox = FakeMailbox::new(vec![raw("m1", "Hello"), raw("m2", "World")], 5)
            .failing_fetch("m1", 10);
        let (_mail, _store, pipeline) = pipeline(mailbox).await;

        let report = pipeline.ingest(&request(10)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn listing_failure_aborts() {
        let mut mailbox = FakeMailbox::new(vec![raw("m1", "Hello")], 5);
        mailbox.fail_listing = true;
        let (_mail, _store, pipeline) = pipeline(mailbox).await;

        let err = pipeline.ingest(&request(10)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Listing(_)));
    }

    #[test]
    fn documents_carry_chunk_metadata() {
        let mut message = raw("m1", "");
        message.received_at = Some(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let body = "abcdefghij";

        let docs = build_documents(&message, body, 4, 1);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].metadata.chunk_index, 0);
        assert_eq!(docs[2].metadata.chunk_index, 2);
        assert!(docs.iter().all(|d| d.metadata.total_chunks == 3));
        assert_eq!(docs[0].metadata.received_at, "2023-11-14T22:13:20Z");
        assert_eq!(docs[1].metadata.thread_id, "thread-m1");
    }
}
