//! Relationships - directed, typed edges between code entities
//!
//! - `Calls`: function → function
//! - `Imports`: module → module
//! - `Inherits`: class → class
//! - `UsesType`: entity → type it references
//! - `Similar`: entity → entity with a similarity score in `weight`
//! - `Contains`: container → member

use crate::id::{EntityId, RelationshipId};
use crate::schema::attr;
use crate::value::{AttributeMap, Value};
use crate::{Error, Result};
use serde::Serialize;
use std::str::FromStr;

/// Relationship kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    Calls,
    Imports,
    Inherits,
    UsesType,
    Similar,
    Contains,
}

impl RelationshipType {
    /// Get the string representation of the relationship type
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Calls => "calls",
            RelationshipType::Imports => "imports",
            RelationshipType::Inherits => "inherits",
            RelationshipType::UsesType => "uses-type",
            RelationshipType::Similar => "similar",
            RelationshipType::Contains => "contains",
        }
    }

    /// Get all relationship types
    pub fn all() -> &'static [RelationshipType] {
        &[
            RelationshipType::Calls,
            RelationshipType::Imports,
            RelationshipType::Inherits,
            RelationshipType::UsesType,
            RelationshipType::Similar,
            RelationshipType::Contains,
        ]
    }
}

impl FromStr for RelationshipType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "calls" | "call" => Ok(RelationshipType::Calls),
            "imports" | "import" => Ok(RelationshipType::Imports),
            "inherits" | "inherit" | "extends" => Ok(RelationshipType::Inherits),
            "usestype" | "uses-type" | "uses_type" => Ok(RelationshipType::UsesType),
            "similar" | "similar-to" => Ok(RelationshipType::Similar),
            "contains" | "contain" => Ok(RelationshipType::Contains),
            _ => Err(Error::UnknownVariant {
                kind: "relationship type",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed relationship between two entities
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub id: RelationshipId,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    pub source: EntityId,
    pub target: EntityId,
    /// Edge weight; the similarity score in [0, 1] for `Similar`
    pub weight: f64,
    pub context: Option<String>,
    /// Number of occurrences, at least 1
    pub frequency: u32,
}

impl Relationship {
    /// Create a relationship with weight 1.0 and frequency 1
    pub fn new(kind: RelationshipType, source: EntityId, target: EntityId) -> Self {
        Self {
            id: RelationshipId::new(),
            kind,
            source,
            target,
            weight: 1.0,
            context: None,
            frequency: 1,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = frequency;
        self
    }

    /// Whether either endpoint is `id`
    pub fn touches(&self, id: EntityId) -> bool {
        self.source == id || self.target == id
    }

    pub fn to_facts(&self) -> AttributeMap {
        let mut facts = AttributeMap::new()
            .with(attr::RELATIONSHIP_ID, self.id.to_string())
            .with(attr::RELATIONSHIP_TYPE, Value::keyword(self.kind.as_str()))
            .with(attr::RELATIONSHIP_SOURCE, Value::reference(self.source))
            .with(attr::RELATIONSHIP_TARGET, Value::reference(self.target))
            .with(attr::RELATIONSHIP_WEIGHT, self.weight)
            .with(attr::RELATIONSHIP_FREQUENCY, self.frequency);
        facts.push_opt(attr::RELATIONSHIP_CONTEXT, self.context.as_deref());
        facts
    }

    pub fn from_facts(facts: &AttributeMap) -> Result<Self> {
        Ok(Self {
            id: RelationshipId::parse(facts.require_str(attr::RELATIONSHIP_ID)?)?,
            kind: facts.require_str(attr::RELATIONSHIP_TYPE)?.parse()?,
            source: EntityId::parse(facts.require_str(attr::RELATIONSHIP_SOURCE)?)?,
            target: EntityId::parse(facts.require_str(attr::RELATIONSHIP_TARGET)?)?,
            weight: facts.get_double(attr::RELATIONSHIP_WEIGHT).unwrap_or(1.0),
            context: facts.get_str(attr::RELATIONSHIP_CONTEXT).map(str::to_string),
            frequency: facts.get_u32(attr::RELATIONSHIP_FREQUENCY)?.unwrap_or(1),
        })
    }
}
