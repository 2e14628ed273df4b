use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized record. `None` is the sentinel for a field the source did not provide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: Option<String>,
    pub external_id: Option<String>,
    pub source_url: Option<String>,
    pub kind: Option<String>,
    pub observed_at: Option<String>,
    /// Source fields with no dedicated slot.
    pub attributes: Option<Map<String, Value>>,
}

impl Record {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// What a capability may yield: a fully structured record, a bare identifier,
/// or a partially-populated object.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Structured(Record),
    Identifier(String),
    Partial(Map<String, Value>),
}

impl RawRecord {
    /// Classify a decoded JSON value: strings and numbers are identifiers,
    /// objects are partial records, anything else is an empty partial record.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => RawRecord::Identifier(s),
            Value::Number(n) => RawRecord::Identifier(n.to_string()),
            Value::Object(map) => RawRecord::Partial(map),
            _ => RawRecord::Partial(Map::new()),
        }
    }
}

impl From<Record> for RawRecord {
    fn from(r: Record) -> Self {
        RawRecord::Structured(r)
    }
}

impl From<&str> for RawRecord {
    fn from(s: &str) -> Self {
        RawRecord::Identifier(s.to_string())
    }
}
