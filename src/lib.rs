//! # Codegraph - Code Knowledge Graph Engine
//!
//! Ingests extracted source-code facts into a persistent entity-relationship
//! store and answers analytical graph questions over it.
//!
//! Codegraph provides:
//! - A typed schema of entity, relationship and repository attributes
//! - A transform pipeline from raw extractor output into graph records
//! - A SQLite-backed append-only datom store with chunked commits
//! - Immutable snapshots and a query engine for call graphs, centrality,
//!   dead-code, clone and complexity analysis

pub mod id;
pub mod value;
pub mod entity;
pub mod relationship;
pub mod repository;
pub mod schema;
pub mod storage;
pub mod raw;
pub mod transform;
pub mod adapter;
pub mod view;
pub mod query;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use id::{EntityId, RelationshipId, RepositoryId};
pub use entity::{CodeEntity, EntityDetails, EntityType, Language};
pub use relationship::{Relationship, RelationshipType};
pub use repository::Repository;
pub use storage::{Datastore, SqliteStore};
pub use transform::{CommitBatch, Pipeline, TransformReport};
pub use adapter::GraphStore;
pub use view::StoreView;
pub use query::QueryEngine;

/// Result type alias for Codegraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Codegraph operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema conflict on attribute {attribute}: {reason}")]
    SchemaConflict { attribute: String, reason: String },

    #[error("Partial batch commit: {chunks_applied} of {chunks_total} chunks applied: {source}")]
    PartialBatchCommit {
        chunks_applied: usize,
        chunks_total: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid query parameter: {0}")]
    InvalidQueryParameter(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Type mismatch for attribute {attribute}: expected {expected}")]
    TypeMismatch {
        attribute: String,
        expected: value::ValueType,
    },

    #[error("Attribute {0} has cardinality one but was given several values")]
    CardinalityViolation(String),

    #[error("Assertion carries no identity attribute")]
    MissingIdentity,

    #[error("Identity conflict: {attribute} = {value} already exists")]
    IdentityConflict { attribute: String, value: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}
