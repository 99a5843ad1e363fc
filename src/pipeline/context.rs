//! Context assembly for drafting.
//!
//! Three independent retrievals feed one `EmailContext`:
//! 1. every stored chunk of the thread, oldest first
//! 2. similarity hits for the current question
//! 3. every business rule
//!
//! Nothing is ranked or deduplicated across the three lists.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::PipelineError;
use crate::store::{BusinessRule, DocumentMetadata, RuleStore, SearchRequest, StoredDocument, VectorStore};

/// One piece of retrieved text, regardless of where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextItem {
    pub text: String,
    pub snippet: Option<String>,
    pub metadata: Option<DocumentMetadata>,
}

impl ContextItem {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            snippet: None,
            metadata: None,
        }
    }

    /// Full text, or the snippet when the text is blank.
    pub fn display_text(&self) -> &str {
        if !self.text.trim().is_empty() {
            return &self.text;
        }
        self.snippet.as_deref().unwrap_or_default()
    }
}

impl From<StoredDocument> for ContextItem {
    fn from(doc: StoredDocument) -> Self {
        let snippet = Some(doc.metadata.snippet.clone()).filter(|s| !s.trim().is_empty());
        Self {
            text: doc.text,
            snippet,
            metadata: Some(doc.metadata),
        }
    }
}

/// Everything the prompt composer needs for one draft. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmailContext {
    pub thread_id: String,
    pub current_question: String,
    pub thread_conversation: Vec<ContextItem>,
    pub similar_history: Vec<ContextItem>,
    pub business_rules: Vec<BusinessRule>,
}

pub struct ContextAssembler {
    vectors: Arc<dyn VectorStore>,
    rules: Arc<dyn RuleStore>,
    search: SearchConfig,
}

impl ContextAssembler {
    pub fn new(vectors: Arc<dyn VectorStore>, rules: Arc<dyn RuleStore>, search: SearchConfig) -> Self {
        Self {
            vectors,
            rules,
            search,
        }
    }

    pub async fn collect_context(
        &self,
        thread_id: &str,
        current_question: &str,
    ) -> Result<EmailContext, PipelineError> {
        let thread_conversation = self.load_thread(thread_id).await?;
        let similar_history = self.load_similar(current_question).await?;
        let business_rules = self.rules.find_all().await.map_err(PipelineError::Context)?;

        debug!(
            thread_id,
            thread_items = thread_conversation.len(),
            similar_items = similar_history.len(),
            rules = business_rules.len(),
            "Collected draft context"
        );

        Ok(EmailContext {
            thread_id: thread_id.to_string(),
            current_question: current_question.to_string(),
            thread_conversation,
            similar_history,
            business_rules,
        })
    }

    async fn load_thread(&self, thread_id: &str) -> Result<Vec<ContextItem>, PipelineError> {
        if thread_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let docs = self
            .vectors
            .find_by_thread_id(thread_id)
            .await
            .map_err(PipelineError::Context)?;
        Ok(docs.into_iter().map(ContextItem::from).collect())
    }

    async fn load_similar(&self, question: &str) -> Result<Vec<ContextItem>, PipelineError> {
        let request = SearchRequest {
            query: question.to_string(),
            top_k: self.search.top_k,
            similarity_threshold: self.search.similarity_threshold,
        };
        let hits = self
            .vectors
            .similarity_search(&request)
            .await
            .map_err(PipelineError::Context)?;
        Ok(hits.into_iter().map(|hit| ContextItem::from(hit.document)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::error::EmbeddingError;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use chrono::Utc;

    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        fn model_name(&self) -> &str {
            "constant"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn doc(message_id: &str, thread_id: &str, text: &str) -> StoredDocument {
        StoredDocument::new(
            text,
            DocumentMetadata {
                message_id: message_id.into(),
                thread_id: thread_id.into(),
                snippet: format!("snippet of {message_id}"),
                ..Default::default()
            },
        )
    }

    async fn assembler() -> (Arc<LibSqlBackend>, ContextAssembler) {
        let db = Arc::new(LibSqlBackend::new_memory(Arc::new(ConstantEmbedder)).await.unwrap());
        let assembler = ContextAssembler::new(db.clone(), db.clone(), SearchConfig::default());
        (db, assembler)
    }

    #[tokio::test]
    async fn collects_all_three_sources() {
        let (db, assembler) = assembler().await;
        db.add(&[doc("m1", "t1", "hello"), doc("m2", "t1", "follow-up"), doc("m3", "t9", "other")])
            .await
            .unwrap();
        db.upsert_rule("price", "$12", Utc::now()).await.unwrap();

        let ctx = assembler.collect_context("t1", "what is the price?").await.unwrap();

        assert_eq!(ctx.thread_id, "t1");
        assert_eq!(ctx.current_question, "what is the price?");
        let thread: Vec<&str> = ctx.thread_conversation.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(thread, vec!["hello", "follow-up"]);
        // Default top_k is 4 and the threshold keeps everything.
        assert_eq!(ctx.similar_history.len(), 3);
        assert_eq!(ctx.business_rules.len(), 1);
    }

    #[tokio::test]
    async fn rules_are_never_truncated() {
        let (db, assembler) = assembler().await;
        for i in 0..25 {
            db.upsert_rule(&format!("rule-{i}"), "content", Utc::now()).await.unwrap();
        }
        let ctx = assembler.collect_context("t1", "q").await.unwrap();
        assert_eq!(ctx.business_rules.len(), 25);
    }

    #[tokio::test]
    async fn empty_store_yields_empty_lists() {
        let (_db, assembler) = assembler().await;
        let ctx = assembler.collect_context("", "").await.unwrap();
        assert!(ctx.thread_conversation.is_empty());
        assert!(ctx.similar_history.is_empty());
        assert!(ctx.business_rules.is_empty());
    }

    #[test]
    fn display_text_falls_back_to_snippet() {
        let item = ContextItem {
            text: "  ".into(),
            snippet: Some("short".into()),
            metadata: None,
        };
        assert_eq!(item.display_text(), "short");
        assert_eq!(ContextItem::from_text("full").display_text(), "full");
        assert_eq!(ContextItem::from_text("").display_text(), "");
    }
}
