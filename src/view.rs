//! Store View - immutable, indexed snapshot of the code graph
//!
//! Decoded once from a [`Db`] and never mutated afterwards, so any number of
//! queries may share one view across threads.

use std::collections::HashMap;

use crate::entity::CodeEntity;
use crate::id::EntityId;
use crate::relationship::{Relationship, RelationshipType};
use crate::repository::Repository;
use crate::schema::attr;
use crate::storage::Db;
use crate::Result;

/// Point-in-time read view over the persisted graph.
///
/// Entities keep store insertion order. Relationships whose endpoints are not
/// both present in the snapshot are left out.
#[derive(Debug, Clone, Default)]
pub struct StoreView {
    basis_tx: i64,
    entities: Vec<CodeEntity>,
    /// Entity id to position in `entities`
    index: HashMap<EntityId, usize>,
    relationships: Vec<Relationship>,
    /// Outgoing relationship positions per entity
    edges_from: HashMap<EntityId, Vec<usize>>,
    /// Incoming relationship positions per entity
    edges_to: HashMap<EntityId, Vec<usize>>,
    repositories: Vec<Repository>,
    by_path: HashMap<String, Vec<usize>>,
}

impl StoreView {
    /// Decode every record in a store snapshot
    pub fn from_db(db: &Db) -> Result<Self> {
        let mut repositories = Vec::new();
        let mut entities = Vec::new();
        let mut relationships = Vec::new();

        for record in db.entities() {
            let facts = &record.facts;
            if facts.contains(attr::ENTITY_ID) {
                entities.push(CodeEntity::from_facts(facts)?);
            } else if facts.contains(attr::RELATIONSHIP_ID) {
                relationships.push(Relationship::from_facts(facts)?);
            } else if facts.contains(attr::REPOSITORY_ID) {
                repositories.push(Repository::from_facts(facts)?);
            }
            // anything else is an attribute definition
        }

        Ok(Self::from_records(db.basis_tx(), repositories, entities, relationships))
    }

    /// Build a view from decoded records, in insertion order
    pub fn from_records(
        basis_tx: i64,
        repositories: Vec<Repository>,
        entities: Vec<CodeEntity>,
        relationships: Vec<Relationship>,
    ) -> Self {
        let mut view = Self {
            basis_tx,
            repositories,
            ..Default::default()
        };

        for entity in entities {
            let position = view.entities.len();
            if let Some(path) = &entity.file_path {
                view.by_path.entry(path.clone()).or_default().push(position);
            }
            view.index.insert(entity.id, position);
            view.entities.push(entity);
        }

        for relationship in relationships {
            if !view.index.contains_key(&relationship.source)
                || !view.index.contains_key(&relationship.target)
            {
                tracing::warn!(
                    "Relationship {} ({}) has no live endpoint in snapshot {}; excluded",
                    relationship.id,
                    relationship.kind,
                    basis_tx
                );
                continue;
            }
            let position = view.relationships.len();
            view.edges_from
                .entry(relationship.source)
                .or_default()
                .push(position);
            view.edges_to
                .entry(relationship.target)
                .or_default()
                .push(position);
            view.relationships.push(relationship);
        }

        view
    }

    /// Transaction this view is consistent with
    pub fn basis_tx(&self) -> i64 {
        self.basis_tx
    }

    /// All entities in insertion order
    pub fn entities(&self) -> &[CodeEntity] {
        &self.entities
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    /// Get an entity by id
    pub fn entity(&self, id: EntityId) -> Option<&CodeEntity> {
        self.index.get(&id).map(|&position| &self.entities[position])
    }

    /// Insertion rank of an entity
    pub fn position(&self, id: EntityId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Get all entities in a file
    pub fn entities_in_file(&self, path: &str) -> Vec<&CodeEntity> {
        self.by_path
            .get(path)
            .map(|positions| positions.iter().map(|&p| &self.entities[p]).collect())
            .unwrap_or_default()
    }

    /// Outgoing relationships of an entity
    pub fn outgoing(&self, id: EntityId) -> impl Iterator<Item = &Relationship> {
        self.edges(&self.edges_from, id)
    }

    /// Incoming relationships of an entity
    pub fn incoming(&self, id: EntityId) -> impl Iterator<Item = &Relationship> {
        self.edges(&self.edges_to, id)
    }

    pub fn outgoing_of_kind(
        &self,
        id: EntityId,
        kind: RelationshipType,
    ) -> impl Iterator<Item = &Relationship> {
        self.outgoing(id).filter(move |rel| rel.kind == kind)
    }

    pub fn incoming_of_kind(
        &self,
        id: EntityId,
        kind: RelationshipType,
    ) -> impl Iterator<Item = &Relationship> {
        self.incoming(id).filter(move |rel| rel.kind == kind)
    }

    pub fn relationships_of_kind(
        &self,
        kind: RelationshipType,
    ) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(move |rel| rel.kind == kind)
    }

    /// In-degree plus out-degree over every relationship type
    pub fn degree(&self, id: EntityId) -> usize {
        let count = |edges: &HashMap<EntityId, Vec<usize>>| edges.get(&id).map_or(0, Vec::len);
        count(&self.edges_from) + count(&self.edges_to)
    }

    fn edges<'a>(
        &'a self,
        edges: &'a HashMap<EntityId, Vec<usize>>,
        id: EntityId,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        edges
            .get(&id)
            .into_iter()
            .flatten()
            .map(move |&position| &self.relationships[position])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityDetails, FunctionDetails};
    use crate::storage::{Datastore, SqliteStore};
    use crate::value::TxOp;

    fn function(name: &str, path: &str) -> CodeEntity {
        CodeEntity::new(
            EntityId::new(),
            name,
            EntityDetails::Function(FunctionDetails::default()),
        )
        .with_location(path, 1, 2)
    }

    #[test]
    fn test_indexes() {
        let a = function("a", "x.py");
        let b = function("b", "x.py");
        let c = function("c", "y.py");
        let calls = Relationship::new(RelationshipType::Calls, a.id, b.id);
        let contains = Relationship::new(RelationshipType::Contains, c.id, a.id);

        let view = StoreView::from_records(
            7,
            Vec::new(),
            vec![a.clone(), b.clone(), c.clone()],
            vec![calls, contains],
        );

        assert_eq!(view.basis_tx(), 7);
        assert_eq!(view.entities_in_file("x.py").len(), 2);
        assert_eq!(view.position(c.id), Some(2));
        assert_eq!(view.outgoing(a.id).count(), 1);
        assert_eq!(view.incoming(a.id).count(), 1);
        assert_eq!(view.degree(a.id), 2);
        assert_eq!(view.incoming_of_kind(b.id, RelationshipType::Calls).count(), 1);
        assert_eq!(view.incoming_of_kind(b.id, RelationshipType::Imports).count(), 0);
    }

    #[test]
    fn test_dangling_relationships_excluded() {
        let a = function("a", "x.py");
        let ghost = EntityId::new();
        let view = StoreView::from_records(
            1,
            Vec::new(),
            vec![a.clone()],
            vec![Relationship::new(RelationshipType::Calls, a.id, ghost)],
        );
        assert!(view.relationships().is_empty());
        assert_eq!(view.degree(a.id), 0);
    }

    #[test]
    fn test_from_db() {
        let store = SqliteStore::open_in_memory().unwrap();
        crate::schema::install(&store).unwrap();

        let a = function("a", "x.py");
        let b = function("b", "x.py");
        let rel = Relationship::new(RelationshipType::Calls, a.id, b.id);
        store
            .transact(&[
                TxOp::Assert(a.to_facts()),
                TxOp::Assert(b.to_facts()),
                TxOp::Assert(rel.to_facts()),
            ])
            .unwrap();

        let view = StoreView::from_db(&store.db().unwrap()).unwrap();
        assert_eq!(view.entities().len(), 2);
        assert_eq!(view.entities()[0].id, a.id);
        assert_eq!(view.relationships(), &[rel]);
    }
}
