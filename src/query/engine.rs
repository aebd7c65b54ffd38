//! Query engine implementation
//!
//! Every query is a pure function of a [`StoreView`] and its parameters.
//! Entity result lists are deduplicated and follow store insertion order.
//! Invalid parameters fail with [`Error::InvalidQueryParameter`] before any
//! work is done; there are no partial results.

use std::collections::{HashMap, HashSet, VecDeque};

use regex::Regex;
use serde::Serialize;

use crate::entity::{CodeEntity, EntityType};
use crate::id::EntityId;
use crate::relationship::RelationshipType;
use crate::view::StoreView;
use crate::{Error, Result};

/// An entity with a ranking count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityCount {
    pub entity_id: EntityId,
    pub name: String,
    pub file_path: Option<String>,
    pub count: usize,
}

impl EntityCount {
    fn new(entity: &CodeEntity, count: usize) -> Self {
        Self {
            entity_id: entity.id,
            name: entity.name.clone(),
            file_path: entity.file_path.clone(),
            count,
        }
    }
}

/// Two entities joined by a `Similar` relationship
#[derive(Debug, Clone, Serialize)]
pub struct ClonePair<'a> {
    pub left: &'a CodeEntity,
    pub right: &'a CodeEntity,
    pub weight: f64,
}

/// Cardinality aggregates of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryStatistics {
    pub function_count: usize,
    pub class_count: usize,
    pub module_count: usize,
    pub relationship_count: usize,
}

impl std::fmt::Display for RepositoryStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Repository Statistics:")?;
        writeln!(f, "  Functions: {}", self.function_count)?;
        writeln!(f, "  Classes: {}", self.class_count)?;
        writeln!(f, "  Modules: {}", self.module_count)?;
        writeln!(f, "  Relationships: {}", self.relationship_count)
    }
}

/// Query engine for code graph analysis
pub struct QueryEngine<'a> {
    view: &'a StoreView,
}

impl<'a> QueryEngine<'a> {
    /// Create a new query engine over a snapshot
    pub fn new(view: &'a StoreView) -> Self {
        Self { view }
    }

    /// Direct lookup by id
    pub fn entity(&self, id: EntityId) -> Option<&'a CodeEntity> {
        self.view.entity(id)
    }

    pub fn entities_by_type(&self, entity_type: EntityType) -> Vec<&'a CodeEntity> {
        self.view
            .entities()
            .iter()
            .filter(|e| e.entity_type() == entity_type)
            .collect()
    }

    /// Entities whose name matches a case-sensitive regex (unanchored, so a
    /// plain string is a substring match)
    pub fn find_by_name_pattern(&self, pattern: &str) -> Result<Vec<&'a CodeEntity>> {
        if pattern.is_empty() {
            return Err(Error::InvalidQueryParameter("name pattern is empty".to_string()));
        }
        let regex = Regex::new(pattern).map_err(|e| {
            Error::InvalidQueryParameter(format!("invalid name pattern {:?}: {}", pattern, e))
        })?;

        Ok(self
            .view
            .entities()
            .iter()
            .filter(|e| regex.is_match(&e.name))
            .collect())
    }

    pub fn entities_in_file(&self, path: &str) -> Vec<&'a CodeEntity> {
        self.view.entities_in_file(path)
    }

    /// Sources of `Calls` relationships targeting `id`
    pub fn callers_of(&self, id: EntityId) -> Vec<&'a CodeEntity> {
        self.sources_of(id, RelationshipType::Calls)
    }

    /// Targets of `Calls` relationships from `id`
    pub fn callees_of(&self, id: EntityId) -> Vec<&'a CodeEntity> {
        self.targets_of(id, RelationshipType::Calls)
    }

    /// Intermediates `m` with `source -> m -> target` over `Calls`.
    ///
    /// Two hops only; longer chains are found by [`call_path`](Self::call_path).
    pub fn call_chain(&self, source: EntityId, target: EntityId) -> Vec<&'a CodeEntity> {
        let callers_of_target: HashSet<EntityId> = self
            .view
            .incoming_of_kind(target, RelationshipType::Calls)
            .map(|rel| rel.source)
            .collect();

        self.in_insertion_order(
            self.view
                .outgoing_of_kind(source, RelationshipType::Calls)
                .map(|rel| rel.target)
                .filter(|m| callers_of_target.contains(m)),
        )
    }

    /// Shortest `Calls` path from `source` to `target` of at most
    /// `max_depth` hops, endpoints included.
    ///
    /// Breadth-first with a visited set, so cycles terminate. Neighbours are
    /// explored in relationship insertion order, which makes the chosen path
    /// deterministic among equally short ones.
    pub fn call_path(
        &self,
        source: EntityId,
        target: EntityId,
        max_depth: usize,
    ) -> Result<Option<Vec<&'a CodeEntity>>> {
        if max_depth == 0 {
            return Err(Error::InvalidQueryParameter("max depth must be at least 1".to_string()));
        }
        if self.view.entity(source).is_none() || self.view.entity(target).is_none() {
            return Ok(None);
        }
        if source == target {
            return Ok(self.view.entity(source).map(|e| vec![e]));
        }

        let mut parent: HashMap<EntityId, EntityId> = HashMap::new();
        let mut visited = HashSet::from([source]);
        let mut queue = VecDeque::from([(source, 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for rel in self.view.outgoing_of_kind(current, RelationshipType::Calls) {
                if !visited.insert(rel.target) {
                    continue;
                }
                parent.insert(rel.target, current);
                if rel.target == target {
                    return Ok(Some(self.unwind(&parent, source, target)));
                }
                queue.push_back((rel.target, depth + 1));
            }
        }

        Ok(None)
    }

    fn unwind(
        &self,
        parent: &HashMap<EntityId, EntityId>,
        source: EntityId,
        target: EntityId,
    ) -> Vec<&'a CodeEntity> {
        let mut path = vec![target];
        let mut current = target;
        while current != source {
            match parent.get(&current) {
                Some(&previous) => {
                    path.push(previous);
                    current = previous;
                }
                None => break,
            }
        }
        path.reverse();
        path.into_iter().filter_map(|id| self.view.entity(id)).collect()
    }

    /// Entities ranked by inbound `Calls` relationships, descending; ties keep
    /// insertion order. Entities never called are not listed.
    pub fn most_called(&self, limit: usize) -> Result<Vec<EntityCount>> {
        check_limit(limit)?;
        Ok(self.ranked(limit, self.view.entities().iter(), |entity| {
            self.view
                .incoming_of_kind(entity.id, RelationshipType::Calls)
                .count()
        }))
    }

    /// Functions ranked by in-degree plus out-degree over all relationship
    /// types, descending; ties keep insertion order
    pub fn central_functions(&self, limit: usize) -> Result<Vec<EntityCount>> {
        check_limit(limit)?;
        let functions = self.view.entities().iter().filter(|e| e.is_function());
        Ok(self.ranked(limit, functions, |entity| self.view.degree(entity.id)))
    }

    fn ranked(
        &self,
        limit: usize,
        candidates: impl Iterator<Item = &'a CodeEntity>,
        count: impl Fn(&CodeEntity) -> usize,
    ) -> Vec<EntityCount> {
        let mut ranked: Vec<EntityCount> = candidates
            .map(|entity| EntityCount::new(entity, count(entity)))
            .filter(|ranked| ranked.count > 0)
            .collect();
        // stable: equal counts stay in insertion order
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        ranked
    }

    /// Functions with no docstring at all; an empty docstring counts as present
    pub fn undocumented_functions(&self) -> Vec<&'a CodeEntity> {
        self.functions()
            .filter(|e| e.docstring().is_none())
            .collect()
    }

    /// Functions with `complexity >= threshold`
    pub fn complex_functions(&self, threshold: i64) -> Result<Vec<&'a CodeEntity>> {
        if threshold < 0 {
            return Err(Error::InvalidQueryParameter(format!(
                "complexity threshold {} is negative",
                threshold
            )));
        }
        Ok(self
            .functions()
            .filter(|e| e.complexity().is_some_and(|c| i64::from(c) >= threshold))
            .collect())
    }

    /// `Similar` relationships with `weight >= threshold`
    pub fn potential_clones(&self, threshold: f64) -> Result<Vec<ClonePair<'a>>> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidQueryParameter(format!(
                "similarity threshold {} outside [0, 1]",
                threshold
            )));
        }
        Ok(self
            .view
            .relationships_of_kind(RelationshipType::Similar)
            .filter(|rel| rel.weight >= threshold)
            .filter_map(|rel| {
                Some(ClonePair {
                    left: self.view.entity(rel.source)?,
                    right: self.view.entity(rel.target)?,
                    weight: rel.weight,
                })
            })
            .collect())
    }

    /// Functions with no inbound `Calls`.
    ///
    /// A dead-code heuristic: entry points and dynamically dispatched calls
    /// look the same as unused code.
    pub fn unused_functions(&self) -> Vec<&'a CodeEntity> {
        self.functions()
            .filter(|e| {
                self.view
                    .incoming_of_kind(e.id, RelationshipType::Calls)
                    .next()
                    .is_none()
            })
            .collect()
    }

    pub fn repository_statistics(&self) -> RepositoryStatistics {
        let count = |t: EntityType| {
            self.view
                .entities()
                .iter()
                .filter(|e| e.entity_type() == t)
                .count()
        };
        RepositoryStatistics {
            function_count: count(EntityType::Function),
            class_count: count(EntityType::Class),
            module_count: count(EntityType::Module),
            relationship_count: self.view.relationships().len(),
        }
    }

    /// Entities that inherit from `id`
    pub fn subclasses_of(&self, id: EntityId) -> Vec<&'a CodeEntity> {
        self.sources_of(id, RelationshipType::Inherits)
    }

    /// Entities `id` inherits from
    pub fn superclasses_of(&self, id: EntityId) -> Vec<&'a CodeEntity> {
        self.targets_of(id, RelationshipType::Inherits)
    }

    /// Entities contained in `id`
    pub fn members_of(&self, id: EntityId) -> Vec<&'a CodeEntity> {
        self.targets_of(id, RelationshipType::Contains)
    }

    /// Entities importing `id`
    pub fn importers_of(&self, id: EntityId) -> Vec<&'a CodeEntity> {
        self.sources_of(id, RelationshipType::Imports)
    }

    fn functions(&self) -> impl Iterator<Item = &'a CodeEntity> {
        self.view.entities().iter().filter(|e| e.is_function())
    }

    fn sources_of(&self, id: EntityId, kind: RelationshipType) -> Vec<&'a CodeEntity> {
        self.in_insertion_order(self.view.incoming_of_kind(id, kind).map(|rel| rel.source))
    }

    fn targets_of(&self, id: EntityId, kind: RelationshipType) -> Vec<&'a CodeEntity> {
        self.in_insertion_order(self.view.outgoing_of_kind(id, kind).map(|rel| rel.target))
    }

    fn in_insertion_order(&self, ids: impl Iterator<Item = EntityId>) -> Vec<&'a CodeEntity> {
        let mut positions: Vec<usize> = ids.filter_map(|id| self.view.position(id)).collect();
        positions.sort_unstable();
        positions.dedup();
        let entities = self.view.entities();
        positions.into_iter().map(|p| &entities[p]).collect()
    }
}

fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(Error::InvalidQueryParameter("limit must be at least 1".to_string()));
    }
    Ok(())
}
