//! Storage Layer - append-only datom store
//!
//! The engine needs exactly two primitives from its storage collaborator:
//! - `transact(ops)`: atomically apply a list of attribute-map assertions
//!   and entity retractions as one transaction
//! - `db()`: a snapshot of the current facts as of the latest committed
//!   transaction
//!
//! [`SqliteStore`] implements them over a single SQLite table of datoms
//! `(e, a, v, tx, added)`. Retraction appends `added = 0` datoms; nothing
//! is updated in place.

pub mod tables;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::Result;
use crate::schema::{self, AttributeShape};
use crate::value::{AttributeMap, TxOp};
use serde::Serialize;
use std::collections::HashMap;

/// Transactional storage collaborator
pub trait Datastore: Send + Sync {
    /// Apply all operations atomically as a single transaction
    fn transact(&self, ops: &[TxOp]) -> Result<TxReport>;

    /// Current facts as of the most recent completed transaction
    fn db(&self) -> Result<Db>;
}

/// Result of one `transact` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct TxReport {
    /// Transaction id; the store's basis after the call
    pub tx: i64,
    pub datoms_asserted: usize,
    pub entities_retracted: usize,
    /// Entities retracted by each retraction op, in op order
    pub retracted_per_op: Vec<usize>,
}

/// Current facts about one stored entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFacts {
    /// Store-internal entity number; increases with insertion order
    pub e: i64,
    pub facts: AttributeMap,
}

/// Immutable snapshot of the store's current facts
#[derive(Debug, Clone, Default)]
pub struct Db {
    basis_tx: i64,
    entities: Vec<EntityFacts>,
}

impl Db {
    pub fn new(basis_tx: i64, entities: Vec<EntityFacts>) -> Self {
        Self { basis_tx, entities }
    }

    /// Last transaction visible in this snapshot (0 for an empty store)
    pub fn basis_tx(&self) -> i64 {
        self.basis_tx
    }

    /// Entities in insertion order
    pub fn entities(&self) -> &[EntityFacts] {
        &self.entities
    }

    /// Installed attribute definitions, excluding the built-in meta attributes
    pub fn attribute_shapes(&self) -> Result<HashMap<String, AttributeShape>> {
        self.entities
            .iter()
            .filter(|entity| entity.facts.contains(schema::meta::IDENT))
            .map(|entity| AttributeShape::from_facts(&entity.facts))
            .collect()
    }
}
