//! Storage traits and their record types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Per-chunk provenance, stored as JSON next to the chunk text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub message_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    /// RFC 3339, empty when the source had no arrival time.
    pub received_at: String,
    pub snippet: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// One persisted chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub created_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn new(text: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// A similarity hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: StoredDocument,
    pub score: f32,
}

/// Nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    /// Hits scoring below this are dropped.
    pub similarity_threshold: f32,
}

/// A current-policy fact. One row per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub key: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Chunk storage with embedding search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and persist documents.
    async fn add(&self, documents: &[StoredDocument]) -> Result<(), DatabaseError>;

    /// Best-first hits for `request.query`.
    async fn similarity_search(&self, request: &SearchRequest) -> Result<Vec<ScoredDocument>, DatabaseError>;

    /// Point lookup on the dedup key.
    async fn exists_by_message_id(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// All chunks of a thread in insertion order.
    async fn find_by_thread_id(&self, thread_id: &str) -> Result<Vec<StoredDocument>, DatabaseError>;

    async fn count_documents(&self) -> Result<usize, DatabaseError>;
}

/// Business rule storage.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Every rule, unfiltered.
    async fn find_all(&self) -> Result<Vec<BusinessRule>, DatabaseError>;

    /// Insert or replace the content of `key`, stamping `updated_at = now`.
    async fn upsert_rule(
        &self,
        key: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<BusinessRule, DatabaseError>;
}
