// src/query/operators.rs
//! Field-level query operators
//!
//! Each operator is a separate type implementing [`OperatorMatcher`] and is
//! looked up by name in [`OPERATOR_REGISTRY`]. An operator receives every
//! value the field path resolved to (see `value_utils::resolve_path`) and the
//! operand from the filter; the condition holds when any candidate satisfies
//! it. Logical operators (`$and`, `$or`) nest whole predicates and live in
//! the parent module.

use crate::error::{Result, ShelfError};
use crate::value_utils::{compare_values, values_equal};
use lazy_static::lazy_static;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Trait for all field operators
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use shelfdb_core::query::operators::{GtOperator, OperatorMatcher};
///
/// let price = json!(120);
/// assert!(GtOperator.matches(&[&price], &json!(100)));
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Operator name as written in filters (e.g. "$gt")
    fn name(&self) -> &'static str;

    /// Reject operands the operator cannot use; called once at compile time
    fn validate(&self, _operand: &Value) -> Result<()> {
        Ok(())
    }

    /// `candidates` is empty when the field is missing
    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool;
}

/// Candidates plus the elements of any array candidate
fn expand<'a>(candidates: &'a [&'a Value]) -> impl Iterator<Item = &'a Value> + 'a {
    candidates.iter().flat_map(|&value| {
        let elements: &'a [Value] = match value {
            Value::Array(items) => items.as_slice(),
            _ => &[],
        };
        std::iter::once(value).chain(elements.iter())
    })
}

fn any_equal(candidates: &[&Value], operand: &Value) -> bool {
    expand(candidates).any(|value| values_equal(value, operand))
}

/// Shared body of the ordering operators; incompatible kinds never match
fn any_ordering<F>(candidates: &[&Value], operand: &Value, accept: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    expand(candidates)
        .filter(|value| !value.is_array())
        .any(|value| compare_values(value, operand).map_or(false, &accept))
}

fn require_array<'a>(name: &str, operand: &'a Value) -> Result<&'a Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| ShelfError::Validation(format!("{} requires an array operand", name)))
}

/// `$eq`, also the implicit operator of `{field: literal}`
///
/// An array field matches when any element equals the operand.
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        any_equal(candidates, operand)
    }
}

/// `$ne`: holds for missing fields
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        !any_equal(candidates, operand)
    }
}

pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        any_ordering(candidates, operand, |ord| ord == Ordering::Greater)
    }
}

pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        any_ordering(candidates, operand, |ord| ord != Ordering::Less)
    }
}

pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        any_ordering(candidates, operand, |ord| ord == Ordering::Less)
    }
}

pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        any_ordering(candidates, operand, |ord| ord != Ordering::Greater)
    }
}

/// `$in`: field equals any listed value
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn validate(&self, operand: &Value) -> Result<()> {
        require_array(self.name(), operand).map(|_| ())
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        operand
            .as_array()
            .map_or(false, |options| options.iter().any(|opt| any_equal(candidates, opt)))
    }
}

/// `$nin`: holds for missing fields
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn validate(&self, operand: &Value) -> Result<()> {
        require_array(self.name(), operand).map(|_| ())
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        !InOperator.matches(candidates, operand)
    }
}

pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn validate(&self, operand: &Value) -> Result<()> {
        if operand.is_boolean() {
            Ok(())
        } else {
            Err(ShelfError::Validation("$exists requires a boolean".to_string()))
        }
    }

    fn matches(&self, candidates: &[&Value], operand: &Value) -> bool {
        operand.as_bool().unwrap_or(true) == !candidates.is_empty()
    }
}

lazy_static! {
    /// Immutable registry of field operators, keyed by name
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();

        // Comparison operators
        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));

        // Membership
        registry.insert("$in", Box::new(InOperator));
        registry.insert("$nin", Box::new(NinOperator));

        // Element
        registry.insert("$exists", Box::new(ExistsOperator));

        registry
    };
}

/// Look up an operator by name
pub fn lookup(name: &str) -> Option<&'static dyn OperatorMatcher> {
    OPERATOR_REGISTRY.get(name).map(|op| op.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_operator_array_membership() {
        let tags = json!(["wireless", "audio"]);
        assert!(EqOperator.matches(&[&tags], &json!("audio")));
        assert!(EqOperator.matches(&[&tags], &json!(["wireless", "audio"])));
        assert!(!EqOperator.matches(&[&tags], &json!("video")));
        assert!(!EqOperator.matches(&[], &json!("audio")));
    }

    #[test]
    fn test_eq_operator_numeric_normalisation() {
        assert!(EqOperator.matches(&[&json!(4)], &json!(4.0)));
    }

    #[test]
    fn test_ne_operator_missing_field() {
        assert!(NeOperator.matches(&[], &json!("x")));
        assert!(!NeOperator.matches(&[&json!("x")], &json!("x")));
    }

    #[test]
    fn test_comparison_operators() {
        let v = json!(10);
        assert!(GtOperator.matches(&[&v], &json!(5)));
        assert!(!GtOperator.matches(&[&v], &json!(10)));
        assert!(GteOperator.matches(&[&v], &json!(10)));
        assert!(LtOperator.matches(&[&v], &json!(10.5)));
        assert!(LteOperator.matches(&[&v], &json!(10)));
        assert!(!LteOperator.matches(&[&v], &json!(9)));
    }

    #[test]
    fn test_comparison_type_mismatch_is_false() {
        let v = json!("50000");
        assert!(!LtOperator.matches(&[&v], &json!(60000)));
        assert!(!GteOperator.matches(&[&v], &json!(0)));
        assert!(!GtOperator.matches(&[&json!(null)], &json!(0)));
    }

    #[test]
    fn test_comparison_any_candidate() {
        let (a, b) = (json!(2), json!(5));
        assert!(GteOperator.matches(&[&a, &b], &json!(4)));
        assert!(!GteOperator.matches(&[&a], &json!(4)));
        let ratings = json!([1, 2, 5]);
        assert!(GtOperator.matches(&[&ratings], &json!(4)));
    }

    #[test]
    fn test_in_and_nin() {
        let v = json!("Furniture");
        let options = json!(["Electronics", "Furniture"]);
        assert!(InOperator.matches(&[&v], &options));
        assert!(!NinOperator.matches(&[&v], &options));
        assert!(NinOperator.matches(&[], &options));
        assert!(InOperator.validate(&json!("Electronics")).is_err());
    }

    #[test]
    fn test_exists_operator() {
        let v = json!(null);
        assert!(ExistsOperator.matches(&[&v], &json!(true)));
        assert!(ExistsOperator.matches(&[], &json!(false)));
        assert!(!ExistsOperator.matches(&[], &json!(true)));
        assert!(ExistsOperator.validate(&json!(1)).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(lookup("$lte").map(|op| op.name()), Some("$lte"));
        assert!(lookup("$regex").is_none());
    }
}
