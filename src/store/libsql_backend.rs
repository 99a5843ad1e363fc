//! libSQL backend for `VectorStore` and `RuleStore`.
//!
//! Chunks live in `email_embeddings` with their vector as a little-endian
//! f32 BLOB. Similarity search is an exact cosine scan over every stored
//! vector, which is fine at mailbox scale.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info, warn};

use crate::embedding::{Embedder, blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    BusinessRule, DocumentMetadata, RuleStore, ScoredDocument, SearchRequest, StoredDocument,
    VectorStore,
};

const DOCUMENT_COLUMNS: &str = "id, content, metadata, created_at";

pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    embedder: Arc<dyn Embedder>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db, embedder).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// In-memory database (tests, dry runs).
    pub async fn new_memory(embedder: Arc<dyn Embedder>) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;
        Self::from_database(db, embedder).await
    }

    async fn from_database(db: LibSqlDatabase, embedder: Arc<dyn Embedder>) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            embedder,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    pub async fn count_rules(&self) -> Result<usize, DatabaseError> {
        count(self.conn(), "SELECT COUNT(*) FROM business_rule").await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_document(row: &libsql::Row) -> Result<StoredDocument, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("read document row: {e}"));

    let metadata_json: String = row.get(2).map_err(read)?;
    let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| DatabaseError::Serialization(format!("document metadata: {e}")))?;
    let created_at: String = row.get(3).map_err(read)?;

    Ok(StoredDocument {
        id: row.get(0).map_err(read)?,
        text: row.get(1).map_err(read)?,
        metadata,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_rule(row: &libsql::Row) -> Result<BusinessRule, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("read rule row: {e}"));
    let updated_at: String = row.get(2).map_err(read)?;
    Ok(BusinessRule {
        key: row.get(0).map_err(read)?,
        content: row.get(1).map_err(read)?,
        updated_at: parse_timestamp(&updated_at),
    })
}

async fn count(conn: &Connection, sql: &str) -> Result<usize, DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
    let n = match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?,
        None => 0,
    };
    Ok(n.max(0) as usize)
}

// ── VectorStore ─────────────────────────────────────────────────────

#[async_trait]
impl VectorStore for LibSqlBackend {
    async fn add(&self, documents: &[StoredDocument]) -> Result<(), DatabaseError> {
        if documents.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await.map_err(DatabaseError::Embedding)?;
        if vectors.len() != documents.len() {
            return Err(DatabaseError::Query(format!(
                "add: {} documents but {} vectors",
                documents.len(),
                vectors.len()
            )));
        }

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("add: begin: {e}")))?;

        for (doc, vector) in documents.iter().zip(vectors) {
            let metadata = serde_json::to_string(&doc.metadata)
                .map_err(|e| DatabaseError::Serialization(format!("document metadata: {e}")))?;
            tx.execute(
                "INSERT INTO email_embeddings
                    (id, message_id, thread_id, content, metadata, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    doc.id.as_str(),
                    doc.metadata.message_id.as_str(),
                    doc.metadata.thread_id.as_str(),
                    doc.text.as_str(),
                    metadata,
                    Value::Blob(vec_to_blob(&vector)),
                    format_timestamp(&doc.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add: insert {}: {e}", doc.id)))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("add: commit: {e}")))?;

        debug!(count = documents.len(), "Stored document chunks");
        Ok(())
    }

    async fn similarity_search(&self, request: &SearchRequest) -> Result<Vec<ScoredDocument>, DatabaseError> {
        if request.query.trim().is_empty() || request.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed_one(&request.query)
            .await
            .map_err(DatabaseError::Embedding)?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS}, embedding FROM email_embeddings WHERE embedding IS NOT NULL"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("similarity_search: {e}")))?;

        let mut hits = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let blob: Vec<u8> = match row.get(4) {
                Ok(blob) => blob,
                Err(e) => {
                    warn!("Skipping embedding row: {e}");
                    continue;
                }
            };
            let score = cosine_similarity(&query_vector, &blob_to_vec(&blob));
            if score < request.similarity_threshold {
                continue;
            }
            match row_to_document(&row) {
                Ok(document) => hits.push(ScoredDocument { document, score }),
                Err(e) => warn!("Skipping document row: {e}"),
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.top_k);
        Ok(hits)
    }

    async fn exists_by_message_id(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM email_embeddings WHERE message_id = ?1 LIMIT 1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("exists_by_message_id: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("exists_by_message_id: {e}")))?;
        Ok(row.is_some())
    }

    async fn find_by_thread_id(&self, thread_id: &str) -> Result<Vec<StoredDocument>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM email_embeddings
                     WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_thread_id: {e}")))?;

        let mut documents = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_document(&row) {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!("Skipping document row: {e}"),
            }
        }
        Ok(documents)
    }

    async fn count_documents(&self) -> Result<usize, DatabaseError> {
        count(self.conn(), "SELECT COUNT(*) FROM email_embeddings").await
    }
}

// ── RuleStore ───────────────────────────────────────────────────────

#[async_trait]
impl RuleStore for LibSqlBackend {
    async fn find_all(&self) -> Result<Vec<BusinessRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT rule_key, rule_content, updated_at FROM business_rule ORDER BY id ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_all rules: {e}")))?;

        // Rules are all-or-nothing: a read error fails the call.
        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find_all rules: {e}")))?
        {
            rules.push(row_to_rule(&row)?);
        }
        Ok(rules)
    }

    async fn upsert_rule(
        &self,
        key: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<BusinessRule, DatabaseError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(DatabaseError::Query("upsert_rule: blank rule key".into()));
        }

        self.conn()
            .execute(
                "INSERT INTO business_rule (rule_key, rule_content, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(rule_key) DO UPDATE SET
                    rule_content = excluded.rule_content,
                    updated_at = excluded.updated_at",
                params![key, content, format_timestamp(&now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_rule: {e}")))?;

        Ok(BusinessRule {
            key: key.to_string(),
            content: content.to_string(),
            updated_at: now,
        })
    }
}
