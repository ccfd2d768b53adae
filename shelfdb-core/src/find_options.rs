// shelfdb-core/src/find_options.rs
// Find query options: projection, sort, limit, skip

use crate::document::ID_FIELD;
use crate::error::{Result, ShelfError};
use crate::value_utils::{get_nested_value, remove_resolved_path, sort_compare};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// `1` / `-1`, the only accepted encodings
    pub fn from_json(value: &Value) -> Option<Self> {
        match value.as_i64() {
            Some(1) => Some(SortDirection::Ascending),
            Some(-1) => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

/// Parse a `{field: 1|-1, ...}` sort specification, keeping key order
pub fn parse_sort_spec(spec: &Value) -> Result<Vec<(String, SortDirection)>> {
    let obj = spec
        .as_object()
        .ok_or_else(|| ShelfError::Validation("Sort specification must be an object".to_string()))?;
    if obj.is_empty() {
        return Err(ShelfError::Validation(
            "Sort specification needs at least one key".to_string(),
        ));
    }

    obj.iter()
        .map(|(field, value)| {
            SortDirection::from_json(value)
                .map(|direction| (field.clone(), direction))
                .ok_or_else(|| {
                    ShelfError::Validation(format!(
                        "Sort direction for '{}' must be 1 or -1",
                        field
                    ))
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum ProjectionMode {
    All,
    Include { fields: Vec<String>, include_id: bool },
    Exclude { fields: Vec<String> },
}

/// Compiled point-query projection
///
/// Either inclusion (`{field: 1}`) or exclusion (`{field: 0}`); `_id` is kept
/// unless suppressed with `_id: 0`, which is the one exclusion allowed next
/// to inclusions.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    mode: ProjectionMode,
}

impl Projection {
    /// Identity projection
    pub fn all() -> Self {
        Projection {
            mode: ProjectionMode::All,
        }
    }

    /// Compile a projection; `null` or `{}` keeps every field
    pub fn from_json(spec: &Value) -> Result<Self> {
        let obj = match spec {
            Value::Null => return Ok(Projection::all()),
            Value::Object(obj) => obj,
            _ => {
                return Err(ShelfError::Validation(
                    "Projection must be an object".to_string(),
                ))
            }
        };

        let mut inclusions = Vec::new();
        let mut exclusions = Vec::new();
        let mut id_setting = None;

        for (field, flag) in obj {
            let include = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) if n.as_i64() == Some(1) => true,
                Value::Number(n) if n.as_i64() == Some(0) => false,
                _ => {
                    return Err(ShelfError::Validation(format!(
                        "Projection value for '{}' must be 0 or 1",
                        field
                    )))
                }
            };

            if field == ID_FIELD {
                id_setting = Some(include);
            } else if include {
                inclusions.push(field.clone());
            } else {
                exclusions.push(field.clone());
            }
        }

        if !inclusions.is_empty() && !exclusions.is_empty() {
            return Err(ShelfError::Validation(format!(
                "Projection cannot mix inclusion ({}) and exclusion ({})",
                inclusions.join(", "),
                exclusions.join(", ")
            )));
        }

        let mode = if !inclusions.is_empty() || id_setting == Some(true) && exclusions.is_empty() {
            ProjectionMode::Include {
                fields: inclusions,
                include_id: id_setting.unwrap_or(true),
            }
        } else if !exclusions.is_empty() || id_setting == Some(false) {
            if id_setting == Some(false) {
                exclusions.push(ID_FIELD.to_string());
            }
            ProjectionMode::Exclude { fields: exclusions }
        } else {
            ProjectionMode::All
        };

        Ok(Projection { mode })
    }

    /// Produce the reduced view of `doc`
    pub fn apply(&self, doc: &Value) -> Value {
        match &self.mode {
            ProjectionMode::All => doc.clone(),
            ProjectionMode::Include { fields, include_id } => {
                let mut result = Value::Object(Map::new());
                if *include_id {
                    if let Some(id) = doc.get(ID_FIELD) {
                        merge_into(&mut result, single_field(ID_FIELD, id.clone()));
                    }
                }
                for path in fields {
                    let parts: Vec<&str> = path.split('.').collect();
                    if let Some(extracted) = extract_path(doc, &parts) {
                        merge_into(&mut result, extracted);
                    }
                }
                result
            }
            ProjectionMode::Exclude { fields } => {
                let mut result = doc.clone();
                for path in fields {
                    remove_resolved_path(&mut result, path);
                }
                result
            }
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Projection::all()
    }
}

pub(crate) fn single_field(name: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(name.to_string(), value);
    Value::Object(map)
}

/// Copy of `value` restricted to `parts`, keeping the nesting shape
///
/// Arrays of sub-documents are projected element-wise; scalar elements are
/// dropped, as there is nothing to select from them.
pub(crate) fn extract_path(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => {
            let inner = extract_path(map.get(*head)?, rest)?;
            Some(single_field(head, inner))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| extract_path(item, parts))
                .collect(),
        )),
        _ => None,
    }
}

/// Deep-merge `src` into `target`, so `a.b` and `a.c` inclusions share `a`
pub(crate) fn merge_into(target: &mut Value, src: Value) {
    match (target, src) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(dst), Value::Array(src)) if dst.len() == src.len() => {
            for (existing, value) in dst.iter_mut().zip(src) {
                merge_into(existing, value);
            }
        }
        (target, src) => *target = src,
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Projection,

    /// Applied in order; ties fall through to the next key
    pub sort: Vec<(String, SortDirection)>,

    pub limit: Option<usize>,

    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Stable multi-key sort with dot-notation keys
pub fn apply_sort(docs: &mut [Value], keys: &[(String, SortDirection)]) {
    if keys.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for (field, direction) in keys {
            let cmp = sort_compare(get_nested_value(a, field), get_nested_value(b, field));
            let cmp = match direction {
                SortDirection::Ascending => cmp,
                SortDirection::Descending => cmp.reverse(),
            };
            if cmp != std::cmp::Ordering::Equal {
                return cmp;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Apply skip, then limit
pub fn apply_limit_skip(docs: Vec<Value>, limit: Option<usize>, skip: Option<usize>) -> Vec<Value> {
    docs.into_iter()
        .skip(skip.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
