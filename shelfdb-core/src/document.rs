// shelfdb-core/src/document.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::value_utils::{get_nested_value, resolve_path};

/// Name of the reserved internal identifier field
pub const ID_FIELD: &str = "_id";

/// Internal document identifier
///
/// Untagged so it appears as a plain value inside documents: `{"_id": 2}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
}

impl DocumentId {
    /// Next auto-increment id after `last_id`, `None` once past `i64::MAX`
    pub fn new_auto(last_id: u64) -> Option<Self> {
        let next = i64::try_from(last_id.checked_add(1)?).ok()?;
        Some(DocumentId::Int(next))
    }

    /// Random object id (UUID v4)
    pub fn new_object_id() -> Self {
        DocumentId::String(Uuid::new_v4().to_string())
    }

    /// Accepts integer or string `_id` values only
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(DocumentId::Int),
            Value::String(s) => Some(DocumentId::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::String(s) => write!(f, "{}", s),
        }
    }
}

/// One stored record
///
/// The body is a JSON object whose first field is always `_id`; the id is
/// cached alongside so lookups never re-parse it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    body: Value,
}

impl Document {
    /// Build a document from caller fields, placing `_id` first
    ///
    /// Any `_id` already present in `fields` is replaced by `id`.
    pub fn new(id: DocumentId, mut fields: Map<String, Value>) -> Self {
        fields.shift_remove(ID_FIELD);
        let mut body = Map::with_capacity(fields.len() + 1);
        body.insert(ID_FIELD.to_string(), id.to_value());
        body.extend(fields);
        Document {
            id,
            body: Value::Object(body),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Read-only JSON view, `_id` included
    pub fn as_value(&self) -> &Value {
        &self.body
    }

    pub fn into_value(self) -> Value {
        self.body
    }

    /// Single value at a dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_nested_value(&self.body, path)
    }

    /// Every value reached by a dotted path, distributing over arrays
    pub fn resolve(&self, path: &str) -> Vec<&Value> {
        resolve_path(&self.body, path)
    }

    /// Mutable access to the body for update operators
    ///
    /// Callers must not touch `_id`; update compilation rejects such paths.
    pub(crate) fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }
}
