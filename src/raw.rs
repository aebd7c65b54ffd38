//! Raw extractor output
//!
//! The external extractor emits loosely-typed JSON records. They are parsed
//! into a tagged union of the recognized shapes; records whose `type` is not
//! an entity type become [`RawEntity::Unrecognized`], and records whose
//! recognized fields are ill-typed become [`RawEntity::Malformed`]. Neither
//! fails the batch.
//!
//! ```json
//! {
//!   "repository": { "name": "demo", "path": "/src/demo" },
//!   "entities": [
//!     { "type": "Function", "name": "foo", "filePath": "a.py", "complexity": 5 }
//!   ],
//!   "relationships": [
//!     { "type": "Calls", "from": "foo", "to": "bar" }
//!   ]
//! }
//! ```

use crate::entity::EntityType;
use crate::Result;
use serde::{Deserialize, Deserializer};
use serde_json::Value as Json;
use std::io::Read;

/// Fields shared by every raw entity
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCommon {
    /// Extractor-local reference used by relationships; defaults to `name`
    pub key: Option<String>,
    pub name: String,
    #[serde(alias = "full_name")]
    pub full_name: Option<String>,
    #[serde(alias = "file_path")]
    pub file_path: Option<String>,
    #[serde(alias = "start_line")]
    pub start_line: Option<u32>,
    #[serde(alias = "end_line")]
    pub end_line: Option<u32>,
    #[serde(alias = "start_col")]
    pub start_col: Option<u32>,
    #[serde(alias = "end_col")]
    pub end_col: Option<u32>,
    #[serde(alias = "source_code")]
    pub source_code: Option<String>,
    pub language: Option<String>,
    #[serde(alias = "content_hash")]
    pub content_hash: Option<String>,
    #[serde(alias = "embedding_vector")]
    pub embedding_vector: Option<Vec<f32>>,
    #[serde(alias = "embedding_model")]
    pub embedding_model: Option<String>,
    #[serde(alias = "embedding_dimension")]
    pub embedding_dimension: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFunction {
    #[serde(flatten)]
    pub common: RawCommon,
    pub signature: Option<String>,
    #[serde(alias = "return_type")]
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub complexity: Option<u32>,
    #[serde(default, alias = "async", alias = "is_async")]
    pub is_async: bool,
    #[serde(default, alias = "generator", alias = "is_generator")]
    pub is_generator: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClass {
    #[serde(flatten)]
    pub common: RawCommon,
    pub docstring: Option<String>,
    #[serde(default, alias = "abstract", alias = "is_abstract")]
    pub is_abstract: bool,
    #[serde(default, alias = "interface", alias = "is_interface")]
    pub is_interface: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawModule {
    #[serde(flatten)]
    pub common: RawCommon,
    pub path: Option<String>,
    #[serde(alias = "size_loc")]
    pub size_loc: Option<u32>,
}

/// One raw entity record
#[derive(Debug, Clone)]
pub enum RawEntity {
    Function(RawFunction),
    Class(RawClass),
    Module(RawModule),
    Variable(RawCommon),
    Interface(RawCommon),
    Trait(RawCommon),
    /// `type` missing or not an entity type
    Unrecognized {
        type_name: Option<String>,
        key: Option<String>,
    },
    /// Recognized type whose fields failed to parse
    Malformed {
        type_name: String,
        key: Option<String>,
        error: String,
    },
}

impl RawEntity {
    /// Classify one JSON record; never fails
    pub fn from_json(value: Json) -> Self {
        let key = json_str(&value, "key").or_else(|| json_str(&value, "name"));
        let Some(type_name) = json_str(&value, "type") else {
            return RawEntity::Unrecognized {
                type_name: None,
                key,
            };
        };
        let Ok(entity_type) = type_name.parse::<EntityType>() else {
            return RawEntity::Unrecognized {
                type_name: Some(type_name),
                key,
            };
        };

        let parsed = match entity_type {
            EntityType::Function => serde_json::from_value(value).map(RawEntity::Function),
            EntityType::Class => serde_json::from_value(value).map(RawEntity::Class),
            EntityType::Module => serde_json::from_value(value).map(RawEntity::Module),
            EntityType::Variable => serde_json::from_value(value).map(RawEntity::Variable),
            EntityType::Interface => serde_json::from_value(value).map(RawEntity::Interface),
            EntityType::Trait => serde_json::from_value(value).map(RawEntity::Trait),
        };
        parsed.unwrap_or_else(|e| RawEntity::Malformed {
            type_name,
            key,
            error: e.to_string(),
        })
    }

    /// Shared fields of a recognized record
    pub fn common(&self) -> Option<&RawCommon> {
        match self {
            RawEntity::Function(f) => Some(&f.common),
            RawEntity::Class(c) => Some(&c.common),
            RawEntity::Module(m) => Some(&m.common),
            RawEntity::Variable(c) | RawEntity::Interface(c) | RawEntity::Trait(c) => Some(c),
            RawEntity::Unrecognized { .. } | RawEntity::Malformed { .. } => None,
        }
    }

    /// Name relationships use to reference this record
    pub fn raw_key(&self) -> Option<&str> {
        match self {
            RawEntity::Unrecognized { key, .. } | RawEntity::Malformed { key, .. } => key.as_deref(),
            _ => self
                .common()
                .map(|c| c.key.as_deref().unwrap_or(c.name.as_str())),
        }
    }

    /// The record's `type` as written by the extractor
    pub fn type_name(&self) -> Option<&str> {
        match self {
            RawEntity::Unrecognized { type_name, .. } => type_name.as_deref(),
            RawEntity::Malformed { type_name, .. } => Some(type_name),
            RawEntity::Function(_) => Some("function"),
            RawEntity::Class(_) => Some("class"),
            RawEntity::Module(_) => Some("module"),
            RawEntity::Variable(_) => Some("variable"),
            RawEntity::Interface(_) => Some("interface"),
            RawEntity::Trait(_) => Some("trait"),
        }
    }
}

impl<'de> Deserialize<'de> for RawEntity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Json::deserialize(deserializer).map(RawEntity::from_json)
    }
}

#[derive(Deserialize)]
struct RelationshipFields {
    #[serde(rename = "type")]
    kind: Option<String>,
    from: Option<String>,
    to: Option<String>,
    weight: Option<f64>,
    context: Option<String>,
    frequency: Option<i64>,
}

/// One raw relationship record; `from`/`to` are raw entity keys
#[derive(Debug, Clone, Default)]
pub struct RawRelationship {
    pub kind: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub weight: Option<f64>,
    pub context: Option<String>,
    pub frequency: Option<i64>,
    /// Parse error when the record's fields were ill-typed
    pub malformed: Option<String>,
}

impl RawRelationship {
    pub fn new(kind: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            from: Some(from.into()),
            to: Some(to.into()),
            ..Default::default()
        }
    }
}

impl<'de> Deserialize<'de> for RawRelationship {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Json::deserialize(deserializer)?;
        let parsed = match serde_json::from_value::<RelationshipFields>(value.clone()) {
            Ok(fields) => RawRelationship {
                kind: fields.kind,
                from: fields.from,
                to: fields.to,
                weight: fields.weight,
                context: fields.context,
                frequency: fields.frequency,
                malformed: None,
            },
            Err(e) => RawRelationship {
                kind: json_str(&value, "type"),
                from: json_str(&value, "from"),
                to: json_str(&value, "to"),
                malformed: Some(e.to_string()),
                ..Default::default()
            },
        };
        Ok(parsed)
    }
}

/// Ingestion session description supplied with a batch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRepository {
    pub name: Option<String>,
    pub path: Option<String>,
}

/// A full extractor batch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBatch {
    #[serde(default)]
    pub repository: Option<RawRepository>,
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
}

impl RawBatch {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

fn json_str(value: &Json, field: &str) -> Option<String> {
    value.get(field).and_then(Json::as_str).map(str::to_string)
}
