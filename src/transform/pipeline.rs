//! Raw records to a [`CommitBatch`]

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use super::similarity::derive_similarities;
use crate::entity::{
    content_hash, ClassDetails, CodeEntity, Embedding, EntityDetails, FunctionDetails, Language,
    ModuleDetails,
};
use crate::id::{EntityId, RepositoryId};
use crate::raw::{RawBatch, RawCommon, RawEntity, RawRelationship};
use crate::relationship::{Relationship, RelationshipType};
use crate::repository::Repository;
use crate::value::TxOp;
use crate::view::StoreView;

/// Why a raw entity was not stored
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// `type` missing or not an entity type
    UnrecognizedType(Option<String>),
    /// Recognized type with ill-typed fields
    Malformed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnrecognizedType(Some(t)) => write!(f, "unrecognized entity type {:?}", t),
            SkipReason::UnrecognizedType(None) => write!(f, "missing entity type"),
            SkipReason::Malformed(error) => write!(f, "malformed record: {}", error),
        }
    }
}

/// Identity assignment for one ingestion run.
///
/// Every raw entity gets its own fresh id by position, so the assignment is
/// total and injective. Only recognized entities are reachable by key; the
/// first entity with a given key wins. Keys absent from the batch fall back
/// to entities already persisted, when the pipeline was seeded with them.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    ids: Vec<EntityId>,
    by_key: HashMap<String, EntityId>,
    known: HashMap<String, EntityId>,
}

impl IdMap {
    /// Id assigned to the raw entity at `index`
    pub fn id_at(&self, index: usize) -> Option<EntityId> {
        self.ids.get(index).copied()
    }

    /// Resolve a relationship endpoint
    pub fn resolve(&self, key: &str) -> Option<EntityId> {
        self.by_key
            .get(key)
            .or_else(|| self.known.get(key))
            .copied()
    }

    /// Number of assigned ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn with_known(mut self, known: &HashMap<String, EntityId>) -> Self {
        self.known = known.clone();
        self
    }
}

/// Generate one fresh id per raw entity
pub fn assign_identities(raw_entities: &[RawEntity]) -> IdMap {
    let mut map = IdMap {
        ids: Vec::with_capacity(raw_entities.len()),
        ..Default::default()
    };
    for raw in raw_entities {
        let id = EntityId::new();
        map.ids.push(id);
        if raw.common().is_some() {
            if let Some(key) = raw.raw_key() {
                map.by_key.entry(key.to_string()).or_insert(id);
            }
        }
    }
    map
}

/// Build the entity record for one raw entity.
///
/// Fields the extractor sent that the schema doesn't know were already
/// dropped while parsing.
pub fn transform_entity(raw: &RawEntity, id: EntityId) -> Result<CodeEntity, SkipReason> {
    let (common, details) = match raw {
        RawEntity::Function(f) => (
            &f.common,
            EntityDetails::Function(FunctionDetails {
                signature: f.signature.clone(),
                return_type: f.return_type.clone(),
                docstring: f.docstring.clone(),
                complexity: f.complexity,
                is_async: f.is_async,
                is_generator: f.is_generator,
            }),
        ),
        RawEntity::Class(c) => (
            &c.common,
            EntityDetails::Class(ClassDetails {
                docstring: c.docstring.clone(),
                is_abstract: c.is_abstract,
                is_interface: c.is_interface,
            }),
        ),
        RawEntity::Module(m) => (
            &m.common,
            EntityDetails::Module(ModuleDetails {
                path: m.path.clone(),
                size_loc: m.size_loc,
            }),
        ),
        RawEntity::Variable(c) => (c, EntityDetails::Variable),
        RawEntity::Interface(c) => (c, EntityDetails::Interface),
        RawEntity::Trait(c) => (c, EntityDetails::Trait),
        RawEntity::Unrecognized { type_name, .. } => {
            return Err(SkipReason::UnrecognizedType(type_name.clone()));
        }
        RawEntity::Malformed { error, .. } => return Err(SkipReason::Malformed(error.clone())),
    };

    Ok(apply_common(CodeEntity::new(id, common.name.clone(), details), common))
}

fn apply_common(mut entity: CodeEntity, common: &RawCommon) -> CodeEntity {
    entity.full_name = common.full_name.clone();
    entity.file_path = common.file_path.clone();
    entity.start_line = common.start_line;
    entity.end_line = common.end_line;
    entity.start_col = common.start_col;
    entity.end_col = common.end_col;
    entity.language = common
        .language
        .as_deref()
        .map(Language::from_name)
        .unwrap_or(Language::Unknown);
    entity.source_code = common.source_code.clone();
    entity.content_hash = common
        .content_hash
        .clone()
        .or_else(|| common.source_code.as_deref().map(content_hash));
    entity.embedding = match (&common.embedding_vector, &common.embedding_model) {
        (Some(vector), Some(model)) if !vector.is_empty() => Some(Embedding {
            vector: vector.clone(),
            model: model.clone(),
            dimension: common.embedding_dimension.unwrap_or(vector.len()),
        }),
        _ => None,
    };
    entity
}

/// Resolve and validate one raw relationship.
///
/// An unresolved endpoint drops the relationship; a resolved one with an
/// invalid type, weight or frequency rejects it. Either way the report is
/// updated and `None` returned.
pub fn transform_relationship(
    raw: &RawRelationship,
    ids: &IdMap,
    report: &mut TransformReport,
) -> Option<Relationship> {
    let source = raw.from.as_deref().and_then(|key| ids.resolve(key));
    let target = raw.to.as_deref().and_then(|key| ids.resolve(key));
    let (Some(source), Some(target)) = (source, target) else {
        debug!(
            "Dropping relationship {:?} -> {:?}: unresolved endpoint",
            raw.from, raw.to
        );
        report.relationships_dropped += 1;
        return None;
    };

    match validate_relationship(raw, source, target) {
        Ok(relationship) => Some(relationship),
        Err(reason) => {
            debug!(
                "Rejecting relationship {:?} -> {:?}: {}",
                raw.from, raw.to, reason
            );
            report.relationships_rejected += 1;
            None
        }
    }
}

fn validate_relationship(
    raw: &RawRelationship,
    source: EntityId,
    target: EntityId,
) -> Result<Relationship, String> {
    if let Some(error) = &raw.malformed {
        return Err(error.clone());
    }

    let kind: RelationshipType = raw
        .kind
        .as_deref()
        .ok_or_else(|| "missing relationship type".to_string())?
        .parse()
        .map_err(|e: crate::Error| e.to_string())?;

    let weight = raw.weight.unwrap_or(1.0);
    if !weight.is_finite() {
        return Err(format!("weight {} is not finite", weight));
    }
    if kind == RelationshipType::Similar && !(0.0..=1.0).contains(&weight) {
        return Err(format!("similarity weight {} outside [0, 1]", weight));
    }

    let frequency = raw.frequency.unwrap_or(1);
    let frequency = u32::try_from(frequency)
        .ok()
        .filter(|f| *f >= 1)
        .ok_or_else(|| format!("frequency {} must be a positive integer", frequency))?;

    let mut relationship = Relationship::new(kind, source, target)
        .with_weight(weight)
        .with_frequency(frequency);
    relationship.context = raw.context.clone();
    Ok(relationship)
}

/// Records of one ingestion run, ready for commit
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub repository: Option<Repository>,
    pub entities: Vec<CodeEntity>,
    pub relationships: Vec<Relationship>,
}

impl CommitBatch {
    /// Assertions in commit order: repository, entities, relationships.
    ///
    /// Any prefix of this list is referentially closed for the batch's own
    /// relationships.
    pub fn to_ops(&self) -> Vec<TxOp> {
        self.repository
            .iter()
            .map(Repository::to_facts)
            .chain(self.entities.iter().map(CodeEntity::to_facts))
            .chain(self.relationships.iter().map(Relationship::to_facts))
            .map(TxOp::Assert)
            .collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        usize::from(self.repository.is_some()) + self.entities.len() + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-run counters; the ingestion observability contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub entities_stored: usize,
    pub entities_skipped: usize,
    pub relationships_stored: usize,
    /// Relationships with an endpoint absent from the id map
    pub relationships_dropped: usize,
    /// Relationships with both endpoints but an invalid type, weight or frequency
    pub relationships_rejected: usize,
    /// `Similar` relationships derived from embeddings (included in `relationships_stored`)
    pub similarities_derived: usize,
}

impl fmt::Display for TransformReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transform Report:")?;
        writeln!(f, "  Entities stored: {}", self.entities_stored)?;
        writeln!(f, "  Entities skipped: {}", self.entities_skipped)?;
        writeln!(f, "  Relationships stored: {}", self.relationships_stored)?;
        writeln!(f, "  Relationships dropped: {}", self.relationships_dropped)?;
        writeln!(f, "  Relationships rejected: {}", self.relationships_rejected)?;
        writeln!(f, "  Similarities derived: {}", self.similarities_derived)
    }
}

/// Transform pipeline configuration.
///
/// Holds no per-run state; each `build_batch` call builds and discards its
/// own id map.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    known: HashMap<String, EntityId>,
    similarity_threshold: Option<f64>,
    repository_name: Option<String>,
    repository_path: Option<String>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let relationship endpoints resolve to already-persisted entities, by
    /// name or qualified name. Batch keys shadow these.
    pub fn with_known_entities(mut self, view: &StoreView) -> Self {
        for entity in view.entities() {
            self.known.entry(entity.name.clone()).or_insert(entity.id);
            if let Some(full_name) = &entity.full_name {
                self.known.entry(full_name.clone()).or_insert(entity.id);
            }
        }
        self
    }

    /// Derive `Similar` relationships between embedded batch entities.
    /// The threshold is clamped to [0, 1]; NaN disables derivation.
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = (!threshold.is_nan()).then(|| threshold.clamp(0.0, 1.0));
        self
    }

    pub fn with_repository(mut self, name: impl Into<String>, path: Option<String>) -> Self {
        self.repository_name = Some(name.into());
        self.repository_path = path;
        self
    }

    /// Transform a raw batch, using its repository description unless the
    /// pipeline names one
    pub fn build(&self, raw: &RawBatch) -> (CommitBatch, TransformReport) {
        match &raw.repository {
            Some(repo) if self.repository_name.is_none() => {
                let mut pipeline = self.clone();
                pipeline.repository_name = repo.name.clone();
                pipeline.repository_path = repo.path.clone();
                pipeline.build_batch(&raw.entities, &raw.relationships)
            }
            _ => self.build_batch(&raw.entities, &raw.relationships),
        }
    }

    pub fn build_batch(
        &self,
        raw_entities: &[RawEntity],
        raw_relationships: &[RawRelationship],
    ) -> (CommitBatch, TransformReport) {
        let mut report = TransformReport::default();
        let ids = assign_identities(raw_entities).with_known(&self.known);
        let repository_id = RepositoryId::new();

        let mut entities = Vec::with_capacity(raw_entities.len());
        for (index, raw) in raw_entities.iter().enumerate() {
            let Some(id) = ids.id_at(index) else {
                continue;
            };
            match transform_entity(raw, id) {
                Ok(mut entity) => {
                    entity.repository = Some(repository_id);
                    entities.push(entity);
                }
                Err(reason) => {
                    debug!("Skipping entity {:?}: {}", raw.raw_key(), reason);
                    report.entities_skipped += 1;
                }
            }
        }

        let mut relationships: Vec<Relationship> = raw_relationships
            .iter()
            .filter_map(|raw| transform_relationship(raw, &ids, &mut report))
            .collect();

        if let Some(threshold) = self.similarity_threshold {
            let similar = derive_similarities(&entities, threshold);
            report.similarities_derived = similar.len();
            relationships.extend(similar);
        }

        let languages: BTreeSet<Language> = entities.iter().map(|e| e.language).collect();
        let repository = Repository {
            id: repository_id,
            name: self
                .repository_name
                .clone()
                .unwrap_or_else(|| "unnamed".to_string()),
            path: self.repository_path.clone(),
            ingestion_date: Utc::now(),
            languages,
        };

        report.entities_stored = entities.len();
        report.relationships_stored = relationships.len();
        debug!(
            "Built batch: {} entities, {} relationships ({} dropped, {} rejected)",
            report.entities_stored,
            report.relationships_stored,
            report.relationships_dropped,
            report.relationships_rejected
        );

        (
            CommitBatch {
                repository: Some(repository),
                entities,
                relationships,
            },
            report,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn raw(value: serde_json::Value) -> RawEntity {
        RawEntity::from_json(value)
    }

    fn foo_bar() -> Vec<RawEntity> {
        vec![
            raw(json!({"type": "Function", "name": "foo", "complexity": 5, "language": "python"})),
            raw(json!({"type": "Function", "name": "bar", "complexity": 15, "language": "python"})),
        ]
    }

    #[test]
    fn test_assign_identities_is_total_and_injective() {
        let entities = vec![
            raw(json!({"type": "Function", "name": "a"})),
            raw(json!({"type": "Function", "name": "a"})),
            raw(json!({"type": "Macro", "name": "m"})),
        ];
        let ids = assign_identities(&entities);
        assert_eq!(ids.len(), 3);

        let distinct: HashSet<_> = (0..3).filter_map(|i| ids.id_at(i)).collect();
        assert_eq!(distinct.len(), 3);

        // first occurrence wins; unrecognized records are not resolvable
        assert_eq!(ids.resolve("a"), ids.id_at(0));
        assert_eq!(ids.resolve("m"), None);
    }

    #[test]
    fn test_build_batch_resolves_relationships() {
        let (batch, report) = Pipeline::new().build_batch(
            &foo_bar(),
            &[RawRelationship::new("Calls", "foo", "bar")],
        );

        assert_eq!(report.entities_stored, 2);
        assert_eq!(report.relationships_stored, 1);
        assert_eq!(report.relationships_dropped, 0);

        let rel = &batch.relationships[0];
        assert_eq!(rel.source, batch.entities[0].id);
        assert_eq!(rel.target, batch.entities[1].id);
        assert_eq!(rel.kind, RelationshipType::Calls);

        let repo = batch.repository.as_ref().unwrap();
        assert!(repo.languages.contains(&Language::Python));
        assert!(batch.entities.iter().all(|e| e.repository == Some(repo.id)));
    }

    #[test]
    fn test_unresolved_relationships_are_dropped() {
        let relationships = vec![
            RawRelationship::new("Calls", "ghost", "bar"),
            RawRelationship::new("Calls", "foo", "ghost"),
            RawRelationship::new("NotAType", "ghost", "ghost"),
            RawRelationship::new("Calls", "foo", "bar"),
        ];
        let (batch, report) = Pipeline::new().build_batch(&foo_bar(), &relationships);

        assert_eq!(report.relationships_dropped, 3);
        assert_eq!(report.relationships_rejected, 0);
        assert_eq!(batch.relationships.len(), 1);

        let ids: HashSet<_> = batch.entities.iter().map(|e| e.id).collect();
        for rel in &batch.relationships {
            assert!(ids.contains(&rel.source) && ids.contains(&rel.target));
        }
    }

    #[test]
    fn test_invalid_relationships_are_rejected() {
        let mut heavy = RawRelationship::new("Similar", "foo", "bar");
        heavy.weight = Some(1.5);
        let mut never = RawRelationship::new("Calls", "foo", "bar");
        never.frequency = Some(0);
        let relationships = vec![RawRelationship::new("Overrides", "foo", "bar"), heavy, never];

        let (batch, report) = Pipeline::new().build_batch(&foo_bar(), &relationships);
        assert_eq!(report.relationships_rejected, 3);
        assert_eq!(report.relationships_dropped, 0);
        assert!(batch.relationships.is_empty());
    }

    #[test]
    fn test_unrecognized_entities_are_skipped() {
        let mut entities = foo_bar();
        entities.push(raw(json!({"type": "Macro", "name": "m"})));
        entities.push(raw(json!({"type": "Function", "name": "bad", "complexity": "high"})));

        let (batch, report) = Pipeline::new().build_batch(
            &entities,
            &[RawRelationship::new("Calls", "foo", "m")],
        );
        assert_eq!(report.entities_stored, 2);
        assert_eq!(report.entities_skipped, 2);
        assert_eq!(report.relationships_dropped, 1);
        assert_eq!(batch.entities.len(), 2);
    }

    #[test]
    fn test_entity_fields_and_defaults() {
        let entity = transform_entity(
            &raw(json!({
                "type": "Module",
                "name": "auth",
                "filePath": "src/auth.py",
                "sourceCode": "import os",
                "sizeLoc": 120,
                "complexity": 99
            })),
            EntityId::new(),
        )
        .unwrap();

        assert_eq!(entity.file_path.as_deref(), Some("src/auth.py"));
        assert_eq!(entity.content_hash, Some(content_hash("import os")));
        assert_eq!(entity.complexity(), None);
        assert_eq!(
            entity.details,
            EntityDetails::Module(ModuleDetails {
                path: None,
                size_loc: Some(120)
            })
        );
    }

    #[test]
    fn test_similarity_derivation() {
        let entities = vec![
            raw(json!({"type": "Function", "name": "a", "embeddingVector": [1.0, 0.0], "embeddingModel": "m"})),
            raw(json!({"type": "Function", "name": "b", "embeddingVector": [1.0, 0.0], "embeddingModel": "m"})),
        ];
        let (batch, report) = Pipeline::new()
            .with_similarity_threshold(0.95)
            .build_batch(&entities, &[]);

        assert_eq!(report.similarities_derived, 1);
        assert_eq!(report.relationships_stored, 1);
        assert_eq!(batch.relationships[0].kind, RelationshipType::Similar);
    }

    #[test]
    fn test_known_entities_resolve_endpoints() {
        let persisted = CodeEntity::new(
            EntityId::new(),
            "helper",
            EntityDetails::Function(FunctionDetails::default()),
        );
        let view = StoreView::from_records(1, Vec::new(), vec![persisted.clone()], Vec::new());

        let (batch, report) = Pipeline::new()
            .with_known_entities(&view)
            .build_batch(&foo_bar(), &[RawRelationship::new("Calls", "foo", "helper")]);

        assert_eq!(report.relationships_dropped, 0);
        assert_eq!(batch.relationships[0].target, persisted.id);
    }

    #[test]
    fn test_commit_order() {
        let (batch, _) = Pipeline::new().build_batch(
            &foo_bar(),
            &[RawRelationship::new("Calls", "foo", "bar")],
        );
        let ops = batch.to_ops();
        assert_eq!(ops.len(), 4);
        assert_eq!(batch.len(), 4);

        let TxOp::Assert(first) = &ops[0] else {
            panic!("expected assertion");
        };
        assert!(first.contains(crate::schema::attr::REPOSITORY_ID));
        let TxOp::Assert(last) = &ops[3] else {
            panic!("expected assertion");
        };
        assert!(last.contains(crate::schema::attr::RELATIONSHIP_ID));
    }
}
