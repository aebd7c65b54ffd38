//! Store Adapter - chunked commits and snapshots over a [`Datastore`]
//!
//! A [`CommitBatch`] is written as a sequence of bounded sub-transactions in
//! list order. Each chunk is atomic; the batch as a whole is not. When a
//! chunk fails, the chunks before it stay persisted and the caller gets
//! [`Error::PartialBatchCommit`] with the number applied.
//!
//! Concurrent `commit` calls are not serialized against each other beyond
//! the store's own per-transaction locking: chunks of two batches may
//! interleave.

use std::num::NonZeroUsize;

use serde::Serialize;
use tracing::{info, warn};

use crate::id::EntityId;
use crate::raw::RawBatch;
use crate::schema::{self, attr, InstallReport};
use crate::storage::{Datastore, SqliteStore};
use crate::transform::{CommitBatch, Pipeline, TransformReport};
use crate::value::{TxOp, Value};
use crate::view::StoreView;
use crate::{Error, Result};

/// Outcome of a fully applied batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitResult {
    pub chunks_applied: usize,
    /// Transaction id of each chunk, in order
    pub tx_ids: Vec<i64>,
    pub datoms_asserted: usize,
}

/// Outcome of [`GraphStore::retract_entity`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetractReport {
    /// Whether the entity existed
    pub found: bool,
    pub relationships_retracted: usize,
    pub tx: Option<i64>,
}

/// Handle over a store for graph ingestion and reads.
///
/// Owns no connection state of its own; the caller opens the store and
/// decides how long it lives.
pub struct GraphStore<'a, S: Datastore + ?Sized = SqliteStore> {
    store: &'a S,
    chunk_size: NonZeroUsize,
}

impl<'a, S: Datastore + ?Sized> GraphStore<'a, S> {
    pub fn new(store: &'a S, chunk_size: NonZeroUsize) -> Self {
        Self { store, chunk_size }
    }

    /// Maximum number of records per sub-transaction
    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Install the schema (idempotent)
    pub fn install_schema(&self) -> Result<InstallReport> {
        schema::install(self.store)
    }

    /// Commit a batch in chunks
    pub fn commit(&self, batch: &CommitBatch) -> Result<CommitResult> {
        self.commit_with_progress(batch, |_, _| {})
    }

    /// Commit a batch, calling `on_chunk(applied, total)` after every chunk
    pub fn commit_with_progress(
        &self,
        batch: &CommitBatch,
        mut on_chunk: impl FnMut(usize, usize),
    ) -> Result<CommitResult> {
        let ops = batch.to_ops();
        let size = self.chunk_size.get();
        let chunks_total = ops.len().div_ceil(size);
        let mut result = CommitResult::default();

        for chunk in ops.chunks(size) {
            match self.store.transact(chunk) {
                Ok(report) => {
                    result.chunks_applied += 1;
                    result.tx_ids.push(report.tx);
                    result.datoms_asserted += report.datoms_asserted;
                    info!(
                        "Committed chunk {}/{} as tx {} ({} datoms)",
                        result.chunks_applied, chunks_total, report.tx, report.datoms_asserted
                    );
                    on_chunk(result.chunks_applied, chunks_total);
                }
                Err(e) => {
                    warn!(
                        "Chunk {}/{} failed; {} chunks remain persisted: {}",
                        result.chunks_applied + 1,
                        chunks_total,
                        result.chunks_applied,
                        e
                    );
                    return Err(Error::PartialBatchCommit {
                        chunks_applied: result.chunks_applied,
                        chunks_total,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(result)
    }

    /// Transform and commit a raw batch.
    ///
    /// The report is returned even when the commit fails.
    pub fn ingest(
        &self,
        pipeline: &Pipeline,
        raw: &RawBatch,
    ) -> (TransformReport, Result<CommitResult>) {
        let (batch, report) = pipeline.build(raw);
        let result = self.commit(&batch);
        (report, result)
    }

    /// Read view as of the most recent completed transaction
    pub fn snapshot(&self) -> Result<StoreView> {
        StoreView::from_db(&self.store.db()?)
    }

    /// Retract an entity and every relationship with it as source or target.
    ///
    /// The cascade is resolved inside the store's transaction, so a
    /// relationship committed concurrently is either retracted with the
    /// entity or committed after it.
    pub fn retract_entity(&self, id: EntityId) -> Result<RetractReport> {
        let ops = [
            TxOp::retract(attr::ENTITY_ID, id.to_string()),
            TxOp::retract_referencing(attr::RELATIONSHIP_SOURCE, Value::reference(id)),
            TxOp::retract_referencing(attr::RELATIONSHIP_TARGET, Value::reference(id)),
        ];
        let report = self.store.transact(&ops)?;

        let per_op = |i: usize| report.retracted_per_op.get(i).copied().unwrap_or(0);
        let found = per_op(0) > 0;
        let relationships_retracted = per_op(1) + per_op(2);
        if !found && relationships_retracted == 0 {
            return Ok(RetractReport::default());
        }

        info!(
            "Retracted entity {} and {} relationships in tx {}",
            id, relationships_retracted, report.tx
        );
        Ok(RetractReport {
            found,
            relationships_retracted,
            tx: Some(report.tx),
        })
    }
}
