// shelfdb-core/src/update.rs
// Update operators: $set, $push, $inc, $unset

use serde_json::{Map, Value};

use crate::document::{Document, ID_FIELD};
use crate::error::{Result, ShelfError};
use crate::value_utils::{get_nested_value, remove_nested_value, set_nested_value};

#[derive(Debug, Clone, PartialEq)]
enum UpdateOp {
    Set { path: String, value: Value },
    Push { path: String, items: Vec<Value> },
    Inc { path: String, amount: Value },
    Unset { path: String },
}

/// A compiled mutation
///
/// ```
/// use serde_json::json;
/// use shelfdb_core::update::Update;
///
/// let update = Update::from_json(&json!({
///     "$push": {"reviews": {"user": "U999", "rating": 4}},
///     "$inc": {"stock": -1}
/// })).unwrap();
/// assert_eq!(update.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for `$set`
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.ops.push(UpdateOp::Set {
            path: field.into(),
            value,
        });
        self
    }

    /// Builder for `$push` of a single element
    pub fn push(mut self, field: impl Into<String>, value: Value) -> Self {
        self.ops.push(UpdateOp::Push {
            path: field.into(),
            items: vec![value],
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .filter(|obj| !obj.is_empty())
            .ok_or_else(|| {
                ShelfError::Validation("Update must be a non-empty object".to_string())
            })?;

        let mut ops = Vec::new();
        for (op, fields) in obj {
            let fields = fields.as_object().ok_or_else(|| {
                ShelfError::Validation(format!("{} requires an object of fields", op))
            })?;

            for (path, value) in fields {
                check_path(op, path)?;
                let compiled = match op.as_str() {
                    "$set" => UpdateOp::Set {
                        path: path.clone(),
                        value: value.clone(),
                    },
                    "$push" => UpdateOp::Push {
                        path: path.clone(),
                        items: push_items(path, value)?,
                    },
                    "$inc" => {
                        if !value.is_number() {
                            return Err(ShelfError::Validation(format!(
                                "$inc amount for '{}' must be a number",
                                path
                            )));
                        }
                        UpdateOp::Inc {
                            path: path.clone(),
                            amount: value.clone(),
                        }
                    }
                    "$unset" => UpdateOp::Unset { path: path.clone() },
                    _ => {
                        return Err(ShelfError::Validation(format!(
                            "Unknown update operator: {}",
                            op
                        )))
                    }
                };
                ops.push(compiled);
            }
        }

        Ok(Update { ops })
    }

    /// Apply in place; returns whether the document changed
    ///
    /// On error the document may be partially modified, so callers apply to
    /// a copy and commit on success.
    pub(crate) fn apply(&self, document: &mut Document) -> Result<bool> {
        let body = document.body_mut();
        let mut modified = false;

        for op in &self.ops {
            match op {
                UpdateOp::Set { path, value } => {
                    if get_nested_value(body, path) != Some(value) {
                        if !set_nested_value(body, path, value.clone()) {
                            return Err(ShelfError::Validation(format!(
                                "$set: cannot create '{}' inside a non-document value",
                                path
                            )));
                        }
                        modified = true;
                    }
                }
                UpdateOp::Push { path, items } => {
                    let array = match get_nested_value(body, path) {
                        Some(Value::Array(existing)) => {
                            let mut array = existing.clone();
                            array.extend(items.iter().cloned());
                            array
                        }
                        Some(_) => {
                            return Err(ShelfError::Validation(format!(
                                "$push: field '{}' is not an array",
                                path
                            )))
                        }
                        None => items.clone(),
                    };
                    if !set_nested_value(body, path, Value::Array(array)) {
                        return Err(ShelfError::Validation(format!(
                            "$push: cannot create '{}' inside a non-document value",
                            path
                        )));
                    }
                    modified |= !items.is_empty();
                }
                UpdateOp::Inc { path, amount } => {
                    let next = match get_nested_value(body, path) {
                        None => amount.clone(),
                        Some(current) => add_numbers(current, amount).ok_or_else(|| {
                            ShelfError::Validation(format!(
                                "$inc: field '{}' is not a number",
                                path
                            ))
                        })?,
                    };
                    if !set_nested_value(body, path, next) {
                        return Err(ShelfError::Validation(format!(
                            "$inc: cannot create '{}' inside a non-document value",
                            path
                        )));
                    }
                    modified = true;
                }
                UpdateOp::Unset { path } => {
                    modified |= remove_nested_value(body, path).is_some();
                }
            }
        }

        Ok(modified)
    }
}

fn check_path(op: &str, path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(ShelfError::Validation(format!(
            "{}: invalid field path '{}'",
            op, path
        )));
    }
    if path == ID_FIELD || path.starts_with("_id.") {
        return Err(ShelfError::Validation(format!(
            "{}: the _id field is immutable",
            op
        )));
    }
    Ok(())
}

/// `$push` value: a single element or `{"$each": [...]}`
fn push_items(path: &str, value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Object(modifiers) if modifiers.contains_key("$each") => {
            if modifiers.len() != 1 {
                return Err(ShelfError::Validation(format!(
                    "$push on '{}': only the $each modifier is supported",
                    path
                )));
            }
            match modifiers.get("$each") {
                Some(Value::Array(items)) => Ok(items.clone()),
                _ => Err(ShelfError::Validation(format!(
                    "$push on '{}': $each requires an array",
                    path
                ))),
            }
        }
        _ => Ok(vec![value.clone()]),
    }
}

/// Integer addition while both sides are integers, float otherwise
fn add_numbers(current: &Value, amount: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Some(Value::from(sum));
        }
    }
    let sum = current.as_f64()? + amount.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

/// Convenience for building updates from plain maps
impl From<Map<String, Value>> for Update {
    fn from(fields: Map<String, Value>) -> Self {
        fields
            .into_iter()
            .fold(Update::new(), |update, (field, value)| update.set(field, value))
    }
}
