//! Code entities - one persisted record per source construct
//!
//! Every entity has exactly one [`EntityType`]. Type-specific attributes live
//! in [`EntityDetails`], so a class can never carry a complexity and a module
//! never carries a docstring.

use crate::id::{EntityId, RepositoryId};
use crate::schema::attr;
use crate::value::{AttributeMap, Value};
use crate::{Error, Result};
use serde::Serialize;
use std::str::FromStr;

/// Kind of source construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Function, method or procedure
    Function,
    Class,
    /// File, module or package
    Module,
    /// Variable, field or constant
    Variable,
    Interface,
    Trait,
}

impl EntityType {
    /// Get the string representation of the entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Function => "function",
            EntityType::Class => "class",
            EntityType::Module => "module",
            EntityType::Variable => "variable",
            EntityType::Interface => "interface",
            EntityType::Trait => "trait",
        }
    }

    /// Get all entity types
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Function,
            EntityType::Class,
            EntityType::Module,
            EntityType::Variable,
            EntityType::Interface,
            EntityType::Trait,
        ]
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "function" | "func" | "fn" | "method" => Ok(EntityType::Function),
            "class" => Ok(EntityType::Class),
            "module" | "mod" | "namespace" | "package" => Ok(EntityType::Module),
            "variable" | "var" | "field" | "constant" => Ok(EntityType::Variable),
            "interface" => Ok(EntityType::Interface),
            "trait" => Ok(EntityType::Trait),
            _ => Err(Error::UnknownVariant {
                kind: "entity type",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source language of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    Clojure,
    C,
    Cpp,
    CSharp,
    Ruby,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
            Language::Clojure => "clojure",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Unknown => "unknown",
        }
    }

    /// Map an extractor's language name; anything unrecognized is `Unknown`
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "python" | "py" => Language::Python,
            "javascript" | "js" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "rust" | "rs" => Language::Rust,
            "go" | "golang" => Language::Go,
            "java" => Language::Java,
            "clojure" | "clj" => Language::Clojure,
            "c" => Language::C,
            "cpp" | "c++" => Language::Cpp,
            "csharp" | "c#" | "cs" => Language::CSharp,
            "ruby" | "rb" => Language::Ruby,
            _ => Language::Unknown,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Embedding vector produced by an external model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub dimension: usize,
}

impl Embedding {
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        let dimension = vector.len();
        Self {
            vector,
            model: model.into(),
            dimension,
        }
    }

    /// Little-endian f32 bytes, as persisted
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8], model: impl Into<String>) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::Decode(format!(
                "embedding of {} bytes is not a whole number of f32 values",
                bytes.len()
            )));
        }
        let vector = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self::new(vector, model))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FunctionDetails {
    pub signature: Option<String>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub complexity: Option<u32>,
    pub is_async: bool,
    pub is_generator: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassDetails {
    pub docstring: Option<String>,
    pub is_abstract: bool,
    pub is_interface: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleDetails {
    pub path: Option<String>,
    pub size_loc: Option<u32>,
}

/// Type tag plus the attributes only that type may carry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntityDetails {
    Function(FunctionDetails),
    Class(ClassDetails),
    Module(ModuleDetails),
    Variable,
    Interface,
    Trait,
}

impl EntityDetails {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityDetails::Function(_) => EntityType::Function,
            EntityDetails::Class(_) => EntityType::Class,
            EntityDetails::Module(_) => EntityType::Module,
            EntityDetails::Variable => EntityType::Variable,
            EntityDetails::Interface => EntityType::Interface,
            EntityDetails::Trait => EntityType::Trait,
        }
    }
}

/// A code entity in the graph.
///
/// Entities are immutable facts about one ingestion run; two entities are
/// equal when their ids are.
#[derive(Debug, Clone, Serialize)]
pub struct CodeEntity {
    pub id: EntityId,
    /// Unqualified name
    pub name: String,
    /// Qualified name
    pub full_name: Option<String>,
    /// File path as reported by the extractor
    pub file_path: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub start_col: Option<u32>,
    pub end_col: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    pub language: Language,
    /// BLAKE3 hex digest of the source text
    pub content_hash: Option<String>,
    /// Ingestion session that produced this entity
    pub repository: Option<RepositoryId>,
    #[serde(skip_serializing)]
    pub embedding: Option<Embedding>,
    #[serde(flatten)]
    pub details: EntityDetails,
}

impl CodeEntity {
    /// Create an entity with only its identity, name and type-specific details
    pub fn new(id: EntityId, name: impl Into<String>, details: EntityDetails) -> Self {
        Self {
            id,
            name: name.into(),
            full_name: None,
            file_path: None,
            start_line: None,
            end_line: None,
            start_col: None,
            end_col: None,
            source_code: None,
            language: Language::Unknown,
            content_hash: None,
            repository: None,
            embedding: None,
            details,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_location(mut self, file_path: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        self.file_path = Some(file_path.into());
        self.start_line = Some(start_line);
        self.end_line = Some(end_line);
        self
    }

    /// Set the source text; the content hash follows it
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        self.content_hash = Some(content_hash(&source));
        self.source_code = Some(source);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.details.entity_type()
    }

    pub fn is_function(&self) -> bool {
        matches!(self.details, EntityDetails::Function(_))
    }

    /// Docstring of a function or class
    pub fn docstring(&self) -> Option<&str> {
        match &self.details {
            EntityDetails::Function(f) => f.docstring.as_deref(),
            EntityDetails::Class(c) => c.docstring.as_deref(),
            _ => None,
        }
    }

    /// Complexity of a function; always `None` for other types
    pub fn complexity(&self) -> Option<u32> {
        match &self.details {
            EntityDetails::Function(f) => f.complexity,
            _ => None,
        }
    }

    /// Attribute map asserted for this entity
    pub fn to_facts(&self) -> AttributeMap {
        let mut facts = AttributeMap::new()
            .with(attr::ENTITY_ID, self.id.to_string())
            .with(attr::ENTITY_TYPE, Value::keyword(self.entity_type().as_str()))
            .with(attr::ENTITY_NAME, self.name.as_str())
            .with(attr::ENTITY_LANGUAGE, Value::keyword(self.language.as_str()));
        facts.push_opt(attr::ENTITY_FULL_NAME, self.full_name.as_deref());
        facts.push_opt(attr::ENTITY_FILE_PATH, self.file_path.as_deref());
        facts.push_opt(attr::ENTITY_START_LINE, self.start_line);
        facts.push_opt(attr::ENTITY_END_LINE, self.end_line);
        facts.push_opt(attr::ENTITY_START_COL, self.start_col);
        facts.push_opt(attr::ENTITY_END_COL, self.end_col);
        facts.push_opt(attr::ENTITY_SOURCE_CODE, self.source_code.as_deref());
        facts.push_opt(attr::ENTITY_CONTENT_HASH, self.content_hash.as_deref());
        facts.push_opt(attr::ENTITY_REPOSITORY, self.repository.map(Value::reference));

        if let Some(embedding) = &self.embedding {
            facts.push(attr::ENTITY_EMBEDDING_VECTOR, Value::Bytes(embedding.to_bytes()));
            facts.push(attr::ENTITY_EMBEDDING_MODEL, embedding.model.as_str());
            facts.push(attr::ENTITY_EMBEDDING_DIMENSION, embedding.dimension as i64);
        }

        match &self.details {
            EntityDetails::Function(f) => {
                facts.push_opt(attr::FUNCTION_SIGNATURE, f.signature.as_deref());
                facts.push_opt(attr::FUNCTION_RETURN_TYPE, f.return_type.as_deref());
                facts.push_opt(attr::FUNCTION_DOCSTRING, f.docstring.as_deref());
                facts.push_opt(attr::FUNCTION_COMPLEXITY, f.complexity);
                facts.push(attr::FUNCTION_ASYNC, f.is_async);
                facts.push(attr::FUNCTION_GENERATOR, f.is_generator);
            }
            EntityDetails::Class(c) => {
                facts.push_opt(attr::CLASS_DOCSTRING, c.docstring.as_deref());
                facts.push(attr::CLASS_ABSTRACT, c.is_abstract);
                facts.push(attr::CLASS_INTERFACE, c.is_interface);
            }
            EntityDetails::Module(m) => {
                facts.push_opt(attr::MODULE_PATH, m.path.as_deref());
                facts.push_opt(attr::MODULE_SIZE_LOC, m.size_loc);
            }
            EntityDetails::Variable | EntityDetails::Interface | EntityDetails::Trait => {}
        }
        facts
    }

    /// Decode an entity from its stored facts
    pub fn from_facts(facts: &AttributeMap) -> Result<Self> {
        let id = EntityId::parse(facts.require_str(attr::ENTITY_ID)?)?;
        let entity_type: EntityType = facts.require_str(attr::ENTITY_TYPE)?.parse()?;
        let text = |attribute: &str| facts.get_str(attribute).map(str::to_string);
        let flag = |attribute: &str| facts.get_bool(attribute).unwrap_or(false);

        let details = match entity_type {
            EntityType::Function => EntityDetails::Function(FunctionDetails {
                signature: text(attr::FUNCTION_SIGNATURE),
                return_type: text(attr::FUNCTION_RETURN_TYPE),
                docstring: text(attr::FUNCTION_DOCSTRING),
                complexity: facts.get_u32(attr::FUNCTION_COMPLEXITY)?,
                is_async: flag(attr::FUNCTION_ASYNC),
                is_generator: flag(attr::FUNCTION_GENERATOR),
            }),
            EntityType::Class => EntityDetails::Class(ClassDetails {
                docstring: text(attr::CLASS_DOCSTRING),
                is_abstract: flag(attr::CLASS_ABSTRACT),
                is_interface: flag(attr::CLASS_INTERFACE),
            }),
            EntityType::Module => EntityDetails::Module(ModuleDetails {
                path: text(attr::MODULE_PATH),
                size_loc: facts.get_u32(attr::MODULE_SIZE_LOC)?,
            }),
            EntityType::Variable => EntityDetails::Variable,
            EntityType::Interface => EntityDetails::Interface,
            EntityType::Trait => EntityDetails::Trait,
        };

        let embedding = match (
            facts.get_bytes(attr::ENTITY_EMBEDDING_VECTOR),
            facts.get_str(attr::ENTITY_EMBEDDING_MODEL),
        ) {
            (Some(bytes), Some(model)) => {
                let mut embedding = Embedding::from_bytes(bytes, model)?;
                if let Some(dimension) = facts.get_long(attr::ENTITY_EMBEDDING_DIMENSION) {
                    embedding.dimension = usize::try_from(dimension).map_err(|_| {
                        Error::Decode(format!("invalid embedding dimension {}", dimension))
                    })?;
                }
                Some(embedding)
            }
            _ => None,
        };

        let repository = facts
            .get_str(attr::ENTITY_REPOSITORY)
            .map(RepositoryId::parse)
            .transpose()?;

        Ok(Self {
            id,
            name: facts.require_str(attr::ENTITY_NAME)?.to_string(),
            full_name: text(attr::ENTITY_FULL_NAME),
            file_path: text(attr::ENTITY_FILE_PATH),
            start_line: facts.get_u32(attr::ENTITY_START_LINE)?,
            end_line: facts.get_u32(attr::ENTITY_END_LINE)?,
            start_col: facts.get_u32(attr::ENTITY_START_COL)?,
            end_col: facts.get_u32(attr::ENTITY_END_COL)?,
            source_code: text(attr::ENTITY_SOURCE_CODE),
            language: facts
                .get_str(attr::ENTITY_LANGUAGE)
                .map(Language::from_name)
                .unwrap_or(Language::Unknown),
            content_hash: text(attr::ENTITY_CONTENT_HASH),
            repository,
            embedding,
            details,
        })
    }
}

impl PartialEq for CodeEntity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CodeEntity {}

impl std::hash::Hash for CodeEntity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// BLAKE3 hex digest used for change detection
pub fn content_hash(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_function() -> CodeEntity {
        CodeEntity::new(
            EntityId::new(),
            "validate_token",
            EntityDetails::Function(FunctionDetails {
                signature: Some("(token: str) -> bool".to_string()),
                docstring: Some("Validates an authentication token".to_string()),
                complexity: Some(4),
                is_async: true,
                ..Default::default()
            }),
        )
        .with_full_name("auth.validate_token")
        .with_location("src/auth.py", 10, 25)
        .with_source("def validate_token(token: str) -> bool:\n    pass")
        .with_language(Language::Python)
    }

    #[test]
    fn test_entity_type_roundtrip() {
        for entity_type in EntityType::all() {
            let parsed: EntityType = entity_type.as_str().parse().unwrap();
            assert_eq!(*entity_type, parsed);
        }
    }

    #[test]
    fn test_entity_type_aliases() {
        assert_eq!(EntityType::from_str("Function").unwrap(), EntityType::Function);
        assert_eq!(EntityType::from_str("method").unwrap(), EntityType::Function);
        assert_eq!(EntityType::from_str("package").unwrap(), EntityType::Module);
        assert!(EntityType::from_str("Macro").is_err());
    }

    #[test]
    fn test_language_from_name() {
        assert_eq!(Language::from_name("Python"), Language::Python);
        assert_eq!(Language::from_name("c++"), Language::Cpp);
        assert_eq!(Language::from_name("cobol"), Language::Unknown);
    }

    #[test]
    fn test_facts_roundtrip() {
        let entity = sample_function();
        let decoded = CodeEntity::from_facts(&entity.to_facts()).unwrap();

        assert_eq!(decoded.id, entity.id);
        assert_eq!(decoded.name, "validate_token");
        assert_eq!(decoded.full_name.as_deref(), Some("auth.validate_token"));
        assert_eq!(decoded.start_line, Some(10));
        assert_eq!(decoded.language, Language::Python);
        assert_eq!(decoded.content_hash, entity.content_hash);
        assert_eq!(decoded.details, entity.details);
    }

    #[test]
    fn test_type_specific_attributes_follow_type() {
        let class = CodeEntity::new(
            EntityId::new(),
            "Session",
            EntityDetails::Class(ClassDetails {
                docstring: Some("A session".to_string()),
                ..Default::default()
            }),
        );
        let facts = class.to_facts();
        assert!(facts.contains(attr::CLASS_DOCSTRING));
        assert!(!facts.contains(attr::FUNCTION_DOCSTRING));
        assert!(!facts.contains(attr::FUNCTION_COMPLEXITY));
        assert_eq!(class.complexity(), None);
        assert_eq!(class.docstring(), Some("A session"));
    }

    #[test]
    fn test_embedding_bytes() {
        let embedding = Embedding::new(vec![0.5, -1.0, 2.25], "mini-lm");
        let decoded = Embedding::from_bytes(&embedding.to_bytes(), "mini-lm").unwrap();
        assert_eq!(decoded, embedding);
        assert_eq!(decoded.dimension, 3);
        assert!(Embedding::from_bytes(&[1, 2, 3], "mini-lm").is_err());
    }

    #[test]
    fn test_content_hash_tracks_source() {
        let entity = sample_function();
        let source = entity.source_code.as_deref().unwrap();
        assert_eq!(entity.content_hash, Some(content_hash(source)));
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
