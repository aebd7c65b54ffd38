//! Schema Registry
//!
//! Declares every attribute the graph stores, with its value type,
//! cardinality and uniqueness. The store validates assertions against the
//! installed definitions, so nothing can be transacted before [`install`].
//!
//! Attribute definitions are themselves stored as entities described by the
//! built-in meta attributes (`db/ident`, `db/valueType`, ...).

use crate::storage::Datastore;
use crate::value::{AttributeMap, Cardinality, TxOp, Value, ValueType};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Attribute identifiers
pub mod attr {
    pub const ENTITY_ID: &str = "entity/id";
    pub const ENTITY_TYPE: &str = "entity/type";
    pub const ENTITY_NAME: &str = "entity/name";
    pub const ENTITY_FULL_NAME: &str = "entity/full-name";
    pub const ENTITY_FILE_PATH: &str = "entity/file-path";
    pub const ENTITY_START_LINE: &str = "entity/start-line";
    pub const ENTITY_END_LINE: &str = "entity/end-line";
    pub const ENTITY_START_COL: &str = "entity/start-col";
    pub const ENTITY_END_COL: &str = "entity/end-col";
    pub const ENTITY_SOURCE_CODE: &str = "entity/source-code";
    pub const ENTITY_LANGUAGE: &str = "entity/language";
    pub const ENTITY_CONTENT_HASH: &str = "entity/content-hash";
    pub const ENTITY_REPOSITORY: &str = "entity/repository";
    pub const ENTITY_EMBEDDING_VECTOR: &str = "entity/embedding-vector";
    pub const ENTITY_EMBEDDING_MODEL: &str = "entity/embedding-model";
    pub const ENTITY_EMBEDDING_DIMENSION: &str = "entity/embedding-dimension";

    pub const FUNCTION_SIGNATURE: &str = "function/signature";
    pub const FUNCTION_RETURN_TYPE: &str = "function/return-type";
    pub const FUNCTION_DOCSTRING: &str = "function/docstring";
    pub const FUNCTION_COMPLEXITY: &str = "function/complexity";
    pub const FUNCTION_ASYNC: &str = "function/async";
    pub const FUNCTION_GENERATOR: &str = "function/generator";

    pub const CLASS_DOCSTRING: &str = "class/docstring";
    pub const CLASS_ABSTRACT: &str = "class/abstract";
    pub const CLASS_INTERFACE: &str = "class/interface";

    pub const MODULE_PATH: &str = "module/path";
    pub const MODULE_SIZE_LOC: &str = "module/size-loc";

    pub const RELATIONSHIP_ID: &str = "relationship/id";
    pub const RELATIONSHIP_TYPE: &str = "relationship/type";
    pub const RELATIONSHIP_SOURCE: &str = "relationship/source";
    pub const RELATIONSHIP_TARGET: &str = "relationship/target";
    pub const RELATIONSHIP_WEIGHT: &str = "relationship/weight";
    pub const RELATIONSHIP_CONTEXT: &str = "relationship/context";
    pub const RELATIONSHIP_FREQUENCY: &str = "relationship/frequency";

    pub const REPOSITORY_ID: &str = "repository/id";
    pub const REPOSITORY_PATH: &str = "repository/path";
    pub const REPOSITORY_NAME: &str = "repository/name";
    pub const REPOSITORY_INGESTION_DATE: &str = "repository/ingestion-date";
    pub const REPOSITORY_LANGUAGES: &str = "repository/languages";
}

/// Meta attributes describing attribute definitions; built into every store
pub mod meta {
    pub const IDENT: &str = "db/ident";
    pub const VALUE_TYPE: &str = "db/valueType";
    pub const CARDINALITY: &str = "db/cardinality";
    pub const UNIQUE: &str = "db/unique";
    pub const DOC: &str = "db/doc";

    /// Keyword stored under `db/unique` for identity attributes
    pub const UNIQUE_IDENTITY: &str = "identity";
}

/// Structural part of an attribute definition; what must agree between
/// the declared and the installed schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttributeShape {
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    /// Identity attributes are globally unique and identify their entity
    pub identity: bool,
}

impl AttributeShape {
    /// Read a shape back from an attribute-definition entity
    pub fn from_facts(facts: &AttributeMap) -> Result<(String, Self)> {
        let ident = facts.require_str(meta::IDENT)?.to_string();
        let value_type = facts.require_str(meta::VALUE_TYPE)?.parse()?;
        let cardinality = facts.require_str(meta::CARDINALITY)?.parse()?;
        let identity = facts.get_str(meta::UNIQUE) == Some(meta::UNIQUE_IDENTITY);
        Ok((
            ident,
            Self {
                value_type,
                cardinality,
                identity,
            },
        ))
    }
}

impl fmt::Display for AttributeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value_type, self.cardinality)?;
        if self.identity {
            write!(f, "/identity")?;
        }
        Ok(())
    }
}

/// Declaration of one attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDef {
    pub ident: &'static str,
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    pub identity: bool,
    pub doc: &'static str,
}

impl AttributeDef {
    const fn one(ident: &'static str, value_type: ValueType, doc: &'static str) -> Self {
        Self {
            ident,
            value_type,
            cardinality: Cardinality::One,
            identity: false,
            doc,
        }
    }

    const fn identity(ident: &'static str, doc: &'static str) -> Self {
        Self {
            ident,
            value_type: ValueType::String,
            cardinality: Cardinality::One,
            identity: true,
            doc,
        }
    }

    const fn many(ident: &'static str, value_type: ValueType, doc: &'static str) -> Self {
        Self {
            ident,
            value_type,
            cardinality: Cardinality::Many,
            identity: false,
            doc,
        }
    }

    pub fn shape(&self) -> AttributeShape {
        AttributeShape {
            value_type: self.value_type,
            cardinality: self.cardinality,
            identity: self.identity,
        }
    }

    /// The attribute-definition entity asserted by [`install`]
    pub fn to_facts(&self) -> AttributeMap {
        let mut facts = AttributeMap::new()
            .with(meta::IDENT, self.ident)
            .with(meta::VALUE_TYPE, Value::keyword(self.value_type.as_str()))
            .with(meta::CARDINALITY, Value::keyword(self.cardinality.as_str()));
        if self.identity {
            facts.push(meta::UNIQUE, Value::keyword(meta::UNIQUE_IDENTITY));
        }
        facts.push(meta::DOC, self.doc);
        facts
    }
}

/// Built-in meta attributes, valid in every store before any install
pub const META_ATTRIBUTES: &[AttributeDef] = &[
    AttributeDef::identity(meta::IDENT, "Unique name of an attribute"),
    AttributeDef::one(meta::VALUE_TYPE, ValueType::Keyword, "Value type of an attribute"),
    AttributeDef::one(meta::CARDINALITY, ValueType::Keyword, "One or many values per entity"),
    AttributeDef::one(meta::UNIQUE, ValueType::Keyword, "Uniqueness constraint"),
    AttributeDef::one(meta::DOC, ValueType::String, "Attribute documentation"),
];

/// Every attribute of the code graph
pub const ATTRIBUTES: &[AttributeDef] = &[
    // CodeEntity
    AttributeDef::identity(attr::ENTITY_ID, "Ingestion-assigned entity identity"),
    AttributeDef::one(attr::ENTITY_TYPE, ValueType::Keyword, "function, class, module, variable, interface or trait"),
    AttributeDef::one(attr::ENTITY_NAME, ValueType::String, "Unqualified name"),
    AttributeDef::one(attr::ENTITY_FULL_NAME, ValueType::String, "Qualified name"),
    AttributeDef::one(attr::ENTITY_FILE_PATH, ValueType::String, "Source file path"),
    AttributeDef::one(attr::ENTITY_START_LINE, ValueType::Long, "First line"),
    AttributeDef::one(attr::ENTITY_END_LINE, ValueType::Long, "Last line"),
    AttributeDef::one(attr::ENTITY_START_COL, ValueType::Long, "First column"),
    AttributeDef::one(attr::ENTITY_END_COL, ValueType::Long, "Last column"),
    AttributeDef::one(attr::ENTITY_SOURCE_CODE, ValueType::String, "Raw source text"),
    AttributeDef::one(attr::ENTITY_LANGUAGE, ValueType::Keyword, "Source language"),
    AttributeDef::one(attr::ENTITY_CONTENT_HASH, ValueType::String, "Hash of the source text for change detection"),
    AttributeDef::one(attr::ENTITY_REPOSITORY, ValueType::Ref, "Ingestion session that produced the entity"),
    AttributeDef::one(attr::ENTITY_EMBEDDING_VECTOR, ValueType::Bytes, "Embedding as little-endian f32"),
    AttributeDef::one(attr::ENTITY_EMBEDDING_MODEL, ValueType::String, "Model that produced the embedding"),
    AttributeDef::one(attr::ENTITY_EMBEDDING_DIMENSION, ValueType::Long, "Embedding dimension"),
    // Function
    AttributeDef::one(attr::FUNCTION_SIGNATURE, ValueType::String, "Declared signature"),
    AttributeDef::one(attr::FUNCTION_RETURN_TYPE, ValueType::String, "Declared return type"),
    AttributeDef::one(attr::FUNCTION_DOCSTRING, ValueType::String, "Documentation string"),
    AttributeDef::one(attr::FUNCTION_COMPLEXITY, ValueType::Long, "Cyclomatic complexity, >= 0"),
    AttributeDef::one(attr::FUNCTION_ASYNC, ValueType::Boolean, "Declared async"),
    AttributeDef::one(attr::FUNCTION_GENERATOR, ValueType::Boolean, "Generator function"),
    // Class
    AttributeDef::one(attr::CLASS_DOCSTRING, ValueType::String, "Documentation string"),
    AttributeDef::one(attr::CLASS_ABSTRACT, ValueType::Boolean, "Abstract class"),
    AttributeDef::one(attr::CLASS_INTERFACE, ValueType::Boolean, "Class used as an interface"),
    // Module
    AttributeDef::one(attr::MODULE_PATH, ValueType::String, "Module path"),
    AttributeDef::one(attr::MODULE_SIZE_LOC, ValueType::Long, "Lines of code, >= 0"),
    // Relationship
    AttributeDef::identity(attr::RELATIONSHIP_ID, "Ingestion-assigned relationship identity"),
    AttributeDef::one(attr::RELATIONSHIP_TYPE, ValueType::Keyword, "calls, imports, inherits, uses-type, similar or contains"),
    AttributeDef::one(attr::RELATIONSHIP_SOURCE, ValueType::Ref, "Source entity"),
    AttributeDef::one(attr::RELATIONSHIP_TARGET, ValueType::Ref, "Target entity"),
    AttributeDef::one(attr::RELATIONSHIP_WEIGHT, ValueType::Double, "Edge weight; similarity score for similar edges"),
    AttributeDef::one(attr::RELATIONSHIP_CONTEXT, ValueType::String, "Free-text context"),
    AttributeDef::one(attr::RELATIONSHIP_FREQUENCY, ValueType::Long, "Occurrences, >= 1"),
    // Repository
    AttributeDef::identity(attr::REPOSITORY_ID, "Ingestion session identity"),
    AttributeDef::one(attr::REPOSITORY_PATH, ValueType::String, "Repository root"),
    AttributeDef::one(attr::REPOSITORY_NAME, ValueType::String, "Repository name"),
    AttributeDef::one(attr::REPOSITORY_INGESTION_DATE, ValueType::Instant, "When the batch was built"),
    AttributeDef::many(attr::REPOSITORY_LANGUAGES, ValueType::Keyword, "Languages of the ingested entities"),
];

/// Look up a declared attribute
pub fn definition(ident: &str) -> Option<&'static AttributeDef> {
    ATTRIBUTES
        .iter()
        .chain(META_ATTRIBUTES.iter())
        .find(|def| def.ident == ident)
}

/// Shapes of the built-in meta attributes
pub fn meta_shapes() -> HashMap<String, AttributeShape> {
    META_ATTRIBUTES
        .iter()
        .map(|def| (def.ident.to_string(), def.shape()))
        .collect()
}

/// Outcome of [`install`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    /// Definitions newly asserted by this call
    pub installed: usize,
    /// Definitions that were already present and matched
    pub existing: usize,
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Schema: {} attributes installed, {} already present",
            self.installed, self.existing
        )
    }
}

/// Definitions still to install, and how many already match
fn plan(installed: &HashMap<String, AttributeShape>) -> Result<(Vec<&'static AttributeDef>, usize)> {
    let mut missing = Vec::new();
    let mut existing = 0;
    for def in ATTRIBUTES {
        match installed.get(def.ident) {
            Some(shape) if *shape == def.shape() => existing += 1,
            Some(shape) => {
                return Err(Error::SchemaConflict {
                    attribute: def.ident.to_string(),
                    reason: format!("installed as {}, declared as {}", shape, def.shape()),
                });
            }
            None => missing.push(def),
        }
    }
    Ok((missing, existing))
}

/// Times `install` re-plans after losing a race to another installer
const INSTALL_ATTEMPTS: usize = 3;

/// Install the schema into a store.
///
/// Idempotent: attributes already present with the same shape are left
/// alone, and when nothing is missing no transaction is issued. An attribute
/// installed with a different shape fails the whole call with
/// [`Error::SchemaConflict`] before anything is written.
///
/// Concurrent installs on one store all succeed. When another caller
/// commits definitions between the read and the write, the write fails on
/// `db/ident` and the plan is recomputed from a fresh snapshot.
pub fn install<S: Datastore + ?Sized>(store: &S) -> Result<InstallReport> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let (missing, existing) = plan(&store.db()?.attribute_shapes()?)?;

        if missing.is_empty() {
            tracing::debug!("Schema up to date ({} attributes)", existing);
            return Ok(InstallReport {
                installed: 0,
                existing,
            });
        }

        let ops: Vec<TxOp> = missing
            .iter()
            .map(|def| TxOp::Assert(def.to_facts()))
            .collect();
        match store.transact(&ops) {
            Ok(report) => {
                tracing::info!(
                    "Installed {} schema attributes in tx {}",
                    missing.len(),
                    report.tx
                );
                return Ok(InstallReport {
                    installed: missing.len(),
                    existing,
                });
            }
            Err(Error::IdentityConflict { attribute, value })
                if attribute == meta::IDENT && attempt < INSTALL_ATTEMPTS =>
            {
                tracing::debug!("{} installed concurrently; re-reading schema", value);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_identity_attributes() {
        let identities: Vec<_> = ATTRIBUTES
            .iter()
            .filter(|def| def.identity)
            .map(|def| def.ident)
            .collect();
        assert_eq!(
            identities,
            vec![attr::ENTITY_ID, attr::RELATIONSHIP_ID, attr::REPOSITORY_ID]
        );
    }

    #[test]
    fn test_idents_are_unique() {
        let mut idents: Vec<_> = ATTRIBUTES.iter().map(|def| def.ident).collect();
        idents.sort_unstable();
        idents.dedup();
        assert_eq!(idents.len(), ATTRIBUTES.len());
    }

    #[test]
    fn test_install_on_empty_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = install(&store).unwrap();
        assert_eq!(report.installed, ATTRIBUTES.len());
        assert_eq!(report.existing, 0);

        let shapes = store.db().unwrap().attribute_shapes().unwrap();
        assert_eq!(shapes.len(), ATTRIBUTES.len());
        assert_eq!(shapes[attr::REPOSITORY_LANGUAGES].cardinality, Cardinality::Many);
        assert!(shapes[attr::ENTITY_ID].identity);
    }

    #[test]
    fn test_install_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        install(&store).unwrap();
        let first = store.db().unwrap();

        let report = install(&store).unwrap();
        assert_eq!(report.installed, 0);
        assert_eq!(report.existing, ATTRIBUTES.len());

        let second = store.db().unwrap();
        assert_eq!(second.basis_tx(), first.basis_tx());
        assert_eq!(
            second.attribute_shapes().unwrap(),
            first.attribute_shapes().unwrap()
        );
    }

    #[test]
    fn test_install_detects_diverged_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        let diverged = AttributeDef::one(attr::FUNCTION_COMPLEXITY, ValueType::String, "legacy");
        store.transact(&[TxOp::Assert(diverged.to_facts())]).unwrap();

        match install(&store) {
            Err(Error::SchemaConflict { attribute, .. }) => {
                assert_eq!(attribute, attr::FUNCTION_COMPLEXITY);
            }
            other => panic!("expected schema conflict, got {:?}", other),
        }

        // nothing else was installed
        let shapes = store.db().unwrap().attribute_shapes().unwrap();
        assert_eq!(shapes.len(), 1);
    }

    #[test]
    fn test_install_completes_partial_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = definition(attr::ENTITY_ID).unwrap();
        store.transact(&[TxOp::Assert(first.to_facts())]).unwrap();

        let report = install(&store).unwrap();
        assert_eq!(report.existing, 1);
        assert_eq!(report.installed, ATTRIBUTES.len() - 1);
    }

    /// Lets another installer commit the full schema just before the first write
    struct InstallsFirst {
        inner: SqliteStore,
        interleaved: AtomicBool,
    }

    impl Datastore for InstallsFirst {
        fn transact(&self, ops: &[TxOp]) -> Result<crate::storage::TxReport> {
            if !self.interleaved.swap(true, Ordering::SeqCst) {
                install(&self.inner)?;
            }
            self.inner.transact(ops)
        }

        fn db(&self) -> Result<crate::storage::Db> {
            self.inner.db()
        }
    }

    #[test]
    fn test_install_after_losing_race() {
        let store = InstallsFirst {
            inner: SqliteStore::open_in_memory().unwrap(),
            interleaved: AtomicBool::new(false),
        };

        let report = install(&store).unwrap();
        assert_eq!(report.installed, 0);
        assert_eq!(report.existing, ATTRIBUTES.len());
        assert_eq!(
            store.db().unwrap().attribute_shapes().unwrap().len(),
            ATTRIBUTES.len()
        );
    }

    #[test]
    fn test_concurrent_installs() {
        for _ in 0..50 {
            let store = SqliteStore::open_in_memory().unwrap();
            let barrier = Barrier::new(2);

            let reports: Vec<_> = thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            install(&store)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let installed: usize = reports
                .into_iter()
                .map(|report| report.unwrap().installed)
                .sum();
            assert_eq!(installed, ATTRIBUTES.len());
            assert_eq!(
                store.db().unwrap().attribute_shapes().unwrap().len(),
                ATTRIBUTES.len()
            );
        }
    }
}
