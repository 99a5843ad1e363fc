//! Draft generation and the draft run.
//!
//! `DraftService` turns one question into one reply body. `DraftRunner`
//! walks recent inbox messages, picks the latest per thread and saves a
//! reply draft for each. Nothing is ever sent.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MailError, PipelineError, error_chain_text};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::client::MailSource;
use crate::mail::types::MessageSummary;
use crate::pipeline::context::ContextAssembler;
use crate::pipeline::prompt;
use crate::pipeline::selector::select_latest_per_thread;
use crate::retry::RetryExecutor;
use crate::text;

/// Longest question handed to the model, in chars.
const MAX_QUESTION_CHARS: usize = 10_000;

const DRAFT_MAX_TOKENS: u32 = 1024;
const DRAFT_TEMPERATURE: f32 = 0.3;

/// A generated reply, not yet saved anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

/// `Re: ` prefix unless the subject already carries one; a blank subject
/// becomes plain `Re:`.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    let has_prefix = trimmed
        .get(..3)
        .is_some_and(|head| head.eq_ignore_ascii_case("re:"));
    if has_prefix {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re:".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

// ── Draft service ───────────────────────────────────────────────────

pub struct DraftService {
    assembler: ContextAssembler,
    llm: Arc<dyn LlmProvider>,
    retry: RetryExecutor,
}

impl DraftService {
    pub fn new(assembler: ContextAssembler, llm: Arc<dyn LlmProvider>, retry: RetryExecutor) -> Self {
        Self {
            assembler,
            llm,
            retry,
        }
    }

    /// Assemble context, compose the prompt and ask the model for a body.
    pub async fn generate_draft(
        &self,
        thread_id: &str,
        question: &str,
        subject: &str,
    ) -> Result<EmailDraft, PipelineError> {
        let ctx = self.assembler.collect_context(thread_id, question).await?;
        let parts = prompt::compose(&ctx);

        let request = CompletionRequest::new(vec![
            ChatMessage::system(parts.system),
            ChatMessage::user(parts.user),
        ])
        .with_max_tokens(DRAFT_MAX_TOKENS)
        .with_temperature(DRAFT_TEMPERATURE);

        let response = self
            .retry
            .execute("llm.complete", || self.llm.complete(request.clone()))
            .await?;

        debug!(
            thread_id,
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Draft generated"
        );

        Ok(EmailDraft {
            subject: reply_subject(subject),
            body: response.content.trim().to_string(),
        })
    }
}

// ── Draft runner ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRunRequest {
    pub query: String,
    pub max_messages: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DraftRunReport {
    /// Messages left after picking the latest per thread.
    pub candidates: usize,
    pub drafted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
enum ItemError {
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub struct DraftRunner {
    mail: Arc<dyn MailSource>,
    service: DraftService,
    retry: RetryExecutor,
}

impl DraftRunner {
    pub fn new(mail: Arc<dyn MailSource>, service: DraftService, retry: RetryExecutor) -> Self {
        Self {
            mail,
            service,
            retry,
        }
    }

    pub async fn run(&self, request: &DraftRunRequest) -> Result<DraftRunReport, PipelineError> {
        let listed = self.list_candidates(request).await?;
        let selected = select_latest_per_thread(listed);
        let mut report = DraftRunReport {
            candidates: selected.len(),
            ..Default::default()
        };

        info!(query = %request.query, candidates = report.candidates, "Starting draft run");

        for summary in &selected {
            match self.draft_one(summary).await {
                Ok(Some(draft_id)) => {
                    report.drafted += 1;
                    info!(
                        message_id = %summary.message_id,
                        thread_id = %summary.thread_id,
                        draft_id = %draft_id,
                        "Reply draft saved"
                    );
                }
                Ok(None) => {
                    report.skipped += 1;
                    debug!(message_id = %summary.message_id, "No question text, skipped");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        message_id = %summary.message_id,
                        thread_id = %summary.thread_id,
                        error = %error_chain_text(&e),
                        "Failed to draft reply"
                    );
                }
            }
        }

        info!(
            candidates = report.candidates,
            drafted = report.drafted,
            skipped = report.skipped,
            failed = report.failed,
            "Draft run finished"
        );
        Ok(report)
    }

    async fn list_candidates(&self, request: &DraftRunRequest) -> Result<Vec<MessageSummary>, PipelineError> {
        let mut listed = Vec::new();
        let mut page_token: Option<String> = None;

        while listed.len() < request.max_messages {
            let batch = request.max_messages - listed.len();
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
            listed.extend(page.messages);
            listed.truncate(request.max_messages);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(listed)
    }

    /// `Ok(None)` when the message has no usable question text.
    async fn draft_one(&self, summary: &MessageSummary) -> Result<Option<String>, ItemError> {
        let raw = self
            .retry
            .execute("mail.fetch_message_content", || {
                self.mail.fetch_message_content(&summary.message_id)
            })
            .await?;

        let mut question = text::clean(&raw.body);
        if question.is_empty() {
            question = raw.snippet.trim().to_string();
        }
        if question.is_empty() {
            return Ok(None);
        }
        let question = truncate_chars(&question, MAX_QUESTION_CHARS);

        let thread_id = if raw.thread_id.is_empty() {
            summary.thread_id.as_str()
        } else {
            raw.thread_id.as_str()
        };
        let subject = if raw.subject.is_empty() {
            summary.subject.as_str()
        } else {
            raw.subject.as_str()
        };

        let draft = self.service.generate_draft(thread_id, question, subject).await?;

        let draft_id = self
            .retry
            .execute("mail.create_reply_draft", || {
                self.mail
                    .create_reply_draft(&summary.message_id, thread_id, &draft.subject, &draft.body)
            })
            .await?;
        Ok(Some(draft_id))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}
