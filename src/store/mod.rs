//! Persistence layer: libSQL-backed chunk and rule storage.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    BusinessRule, DocumentMetadata, RuleStore, ScoredDocument, SearchRequest, StoredDocument,
    VectorStore,
};
