//! Attribute values and transaction operations
//!
//! The store speaks in attribute maps: each assertion is a list of
//! `(attribute, value)` pairs describing one entity. Values are typed by the
//! attribute's declared [`ValueType`].

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Declared type of an attribute's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Free text
    String,
    /// Enumerated symbolic name (entity types, languages, ...)
    Keyword,
    /// 64-bit signed integer
    Long,
    /// 64-bit float
    Double,
    Boolean,
    /// UTC timestamp
    Instant,
    /// Reference to another entity, by its identity value
    Ref,
    /// Opaque bytes (embedding vectors)
    Bytes,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Keyword => "keyword",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
            ValueType::Instant => "instant",
            ValueType::Ref => "ref",
            ValueType::Bytes => "bytes",
        }
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(ValueType::String),
            "keyword" => Ok(ValueType::Keyword),
            "long" => Ok(ValueType::Long),
            "double" => Ok(ValueType::Double),
            "boolean" => Ok(ValueType::Boolean),
            "instant" => Ok(ValueType::Instant),
            "ref" => Ok(ValueType::Ref),
            "bytes" => Ok(ValueType::Bytes),
            _ => Err(Error::UnknownVariant {
                kind: "value type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether an attribute holds one value or a set of values per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::One => "one",
            Cardinality::Many => "many",
        }
    }
}

impl FromStr for Cardinality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one" => Ok(Cardinality::One),
            "many" => Ok(Cardinality::Many),
            _ => Err(Error::UnknownVariant {
                kind: "cardinality",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Keyword(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Instant(DateTime<Utc>),
    Ref(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The type this value satisfies
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Keyword(_) => ValueType::Keyword,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Instant(_) => ValueType::Instant,
            Value::Ref(_) => ValueType::Ref,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn keyword(s: impl Into<String>) -> Self {
        Value::Keyword(s.into())
    }

    pub fn reference(id: impl ToString) -> Self {
        Value::Ref(id.to_string())
    }

    /// Textual content of string, keyword and ref values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Keyword(s) | Value::Ref(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Instant(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) | Value::Ref(s) => write!(f, "{}", s),
            Value::Keyword(s) => write!(f, ":{}", s),
            Value::Long(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Instant(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Long(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Instant(t)
    }
}

/// Ordered list of `(attribute, value)` pairs describing one entity.
///
/// Cardinality-many attributes appear once per value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    pairs: Vec<(String, Value)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(attribute, value);
        self
    }

    pub fn push(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.pairs.push((attribute.into(), value.into()));
    }

    /// Append only when a value is present
    pub fn push_opt(&mut self, attribute: impl Into<String>, value: Option<impl Into<Value>>) {
        if let Some(value) = value {
            self.push(attribute, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(a, v)| (a.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// First value of an attribute
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(a, _)| a == attribute)
            .map(|(_, v)| v)
    }

    /// All values of an attribute (cardinality many)
    pub fn get_all<'a>(&'a self, attribute: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.pairs
            .iter()
            .filter(move |(a, _)| a == attribute)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.get(attribute).is_some()
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(Value::as_str)
    }

    pub fn get_long(&self, attribute: &str) -> Option<i64> {
        self.get(attribute).and_then(Value::as_long)
    }

    pub fn get_double(&self, attribute: &str) -> Option<f64> {
        self.get(attribute).and_then(Value::as_double)
    }

    pub fn get_bool(&self, attribute: &str) -> Option<bool> {
        self.get(attribute).and_then(Value::as_bool)
    }

    pub fn get_instant(&self, attribute: &str) -> Option<DateTime<Utc>> {
        self.get(attribute).and_then(Value::as_instant)
    }

    pub fn get_bytes(&self, attribute: &str) -> Option<&[u8]> {
        self.get(attribute).and_then(Value::as_bytes)
    }

    /// Textual value that must be present
    pub fn require_str(&self, attribute: &str) -> Result<&str> {
        self.get_str(attribute)
            .ok_or_else(|| Error::Decode(format!("missing attribute {}", attribute)))
    }

    /// Long value that must fit a `u32`, if present
    pub fn get_u32(&self, attribute: &str) -> Result<Option<u32>> {
        self.get_long(attribute)
            .map(|n| {
                u32::try_from(n)
                    .map_err(|_| Error::Decode(format!("{} out of range: {}", attribute, n)))
            })
            .transpose()
    }
}

/// One operation inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxOp {
    /// Assert a new entity described by an attribute map
    Assert(AttributeMap),
    /// Retract every current fact of the entity whose identity attribute has this value
    RetractEntity { attribute: String, value: Value },
    /// Retract every entity currently holding this value for the attribute,
    /// e.g. all relationships pointing at one entity
    RetractReferencing { attribute: String, value: Value },
}

impl TxOp {
    pub fn retract(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        TxOp::RetractEntity {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn retract_referencing(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        TxOp::RetractReferencing {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert_eq!(Value::from("x").value_type(), ValueType::String);
        assert_eq!(Value::keyword("function").value_type(), ValueType::Keyword);
        assert_eq!(Value::from(3u32).value_type(), ValueType::Long);
        assert_eq!(Value::from(0.5).value_type(), ValueType::Double);
        assert_eq!(Value::reference("abc").as_str(), Some("abc"));
    }

    #[test]
    fn test_attribute_map_many_values() {
        let map = AttributeMap::new()
            .with("repository/languages", Value::keyword("python"))
            .with("repository/languages", Value::keyword("rust"))
            .with("repository/name", "demo");

        assert_eq!(map.get_all("repository/languages").count(), 2);
        assert_eq!(map.get_str("repository/name"), Some("demo"));
        assert!(map.require_str("repository/path").is_err());
    }

    #[test]
    fn test_get_u32_rejects_negative() {
        let map = AttributeMap::new().with("function/complexity", -1i64);
        assert!(map.get_u32("function/complexity").is_err());

        let map = AttributeMap::new().with("function/complexity", 7i64);
        assert_eq!(map.get_u32("function/complexity").unwrap(), Some(7));
    }

    #[test]
    fn test_value_type_parse() {
        for vt in [ValueType::String, ValueType::Ref, ValueType::Bytes, ValueType::Instant] {
            assert_eq!(vt.as_str().parse::<ValueType>().unwrap(), vt);
        }
        assert!("float".parse::<ValueType>().is_err());
    }
}
