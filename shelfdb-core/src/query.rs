// src/query.rs
//! Compiled filter predicates
//!
//! A filter is a JSON object mapping field paths to either a literal
//! (implicit `$eq`) or an operator object such as `{"$gte": 4.0, "$lt": 5}`.
//! Top-level `$and` / `$or` take arrays of filters. All top-level entries
//! are ANDed.
//!
//! Filters are compiled once by [`Query::from_json`]; malformed filters are
//! rejected there, so [`Query::matches`] is infallible. A field condition
//! holds when any value its path resolves to satisfies it, missing fields
//! only satisfy negative operators, and comparisons across incompatible
//! types are simply false.

pub mod operators;

use serde_json::Value;
use std::fmt;

use crate::document::Document;
use crate::error::{Result, ShelfError};
use crate::value_utils::{as_timestamp, resolve_path};

use self::operators::{lookup, EqOperator, OperatorMatcher};

/// One `{op: operand}` pair on a field
#[derive(Clone)]
struct Condition {
    operator: &'static dyn OperatorMatcher,
    operand: Value,
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operator.name(), self.operand)
    }
}

#[derive(Debug, Clone)]
enum Clause {
    Field { path: String, conditions: Vec<Condition> },
    And(Vec<Query>),
    Or(Vec<Query>),
}

/// A compiled filter
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use shelfdb_core::query::Query;
///
/// let query = Query::from_json(&json!({
///     "category": "Electronics",
///     "price": {"$lt": 50000}
/// })).unwrap();
///
/// assert!(query.matches(&json!({"category": "Electronics", "price": 899})));
/// assert!(!query.matches(&json!({"category": "Electronics", "price": "899"})));
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    json: Value,
    clauses: Vec<Clause>,
}

impl Query {
    /// Empty query, matches every document
    pub fn new() -> Self {
        Query {
            json: Value::Object(serde_json::Map::new()),
            clauses: Vec::new(),
        }
    }

    /// Compile a filter; `null` is accepted as "match all"
    pub fn from_json(json: &Value) -> Result<Self> {
        let filter = match json {
            Value::Null => return Ok(Query::new()),
            Value::Object(filter) => filter,
            _ => {
                return Err(ShelfError::Validation(
                    "Filter must be an object".to_string(),
                ))
            }
        };

        let mut clauses = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            let clause = match key.as_str() {
                "$and" => Clause::And(Self::compile_branches(key, value)?),
                "$or" => Clause::Or(Self::compile_branches(key, value)?),
                op if op.starts_with('$') => {
                    return Err(ShelfError::Validation(format!(
                        "Unknown top-level operator: {}",
                        op
                    )))
                }
                path => Clause::Field {
                    path: path.to_string(),
                    conditions: Self::compile_conditions(path, value)?,
                },
            };
            clauses.push(clause);
        }

        Ok(Query {
            json: json.clone(),
            clauses,
        })
    }

    fn compile_branches(op: &str, value: &Value) -> Result<Vec<Query>> {
        let branches = value
            .as_array()
            .filter(|branches| !branches.is_empty())
            .ok_or_else(|| {
                ShelfError::Validation(format!("{} requires a non-empty array of filters", op))
            })?;
        branches.iter().map(Query::from_json).collect()
    }

    fn compile_conditions(path: &str, value: &Value) -> Result<Vec<Condition>> {
        let operators = match value {
            Value::Object(map) if as_timestamp(value).is_none() => {
                let dollar_keys = map.keys().filter(|k| k.starts_with('$')).count();
                if dollar_keys == 0 {
                    None
                } else if dollar_keys == map.len() {
                    Some(map)
                } else {
                    return Err(ShelfError::Validation(format!(
                        "Field '{}' mixes operators and plain keys",
                        path
                    )));
                }
            }
            _ => None,
        };

        let Some(operators) = operators else {
            return Ok(vec![Condition {
                operator: &EqOperator,
                operand: value.clone(),
            }]);
        };

        operators
            .iter()
            .map(|(name, operand)| {
                let operator = lookup(name).ok_or_else(|| {
                    ShelfError::Validation(format!(
                        "Unknown operator {} on field '{}'",
                        name, path
                    ))
                })?;
                operator.validate(operand).map_err(|e| {
                    ShelfError::Validation(format!("Field '{}': {}", path, e))
                })?;
                Ok(Condition {
                    operator,
                    operand: operand.clone(),
                })
            })
            .collect()
    }

    /// Evaluate against a JSON document
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Field { path, conditions } => {
                let candidates = resolve_path(doc, path);
                conditions
                    .iter()
                    .all(|c| c.operator.matches(&candidates, &c.operand))
            }
            Clause::And(branches) => branches.iter().all(|q| q.matches(doc)),
            Clause::Or(branches) => branches.iter().any(|q| q.matches(doc)),
        })
    }

    pub fn matches_document(&self, document: &Document) -> bool {
        self.matches(document.as_value())
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The filter as it was written
    pub fn to_json(&self) -> &Value {
        &self.json
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}
