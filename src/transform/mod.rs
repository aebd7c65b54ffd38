//! Transform Pipeline - raw extractor output to graph records
//!
//! Per-record problems never fail a batch: unrecognized entities are skipped
//! and relationships with an unresolved endpoint are dropped, and both are
//! counted in the [`TransformReport`].

pub mod pipeline;
pub mod similarity;

pub use pipeline::{
    assign_identities, transform_entity, transform_relationship, CommitBatch, IdMap, Pipeline,
    SkipReason, TransformReport,
};
pub use similarity::{cosine_similarity, derive_similarities};
