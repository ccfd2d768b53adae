// src/aggregation.rs
// Aggregation pipeline implementation

use crate::document::ID_FIELD;
use crate::error::{Result, ShelfError};
use crate::find_options::{
    apply_sort, extract_path, merge_into, parse_sort_spec, single_field, SortDirection,
};
use crate::query::Query;
use crate::value_utils::{
    as_number, canonical_json_string, get_nested_value, reference_value, remove_nested_value,
    remove_resolved_path, set_nested_value, sort_compare,
};
use crate::{log_debug, log_trace};
use ahash::AHashMap;
use serde_json::{Map, Value};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Configuration error for the stage being compiled; the index is filled in
/// by [`Pipeline::from_json`]
fn invalid(reason: impl Into<String>) -> ShelfError {
    ShelfError::Configuration {
        stage: 0,
        reason: reason.into(),
    }
}

/// Parse a field reference (e.g. "$price" -> "price")
///
/// Used by `$group` ids and accumulators, `$project` renames and `$unwind`.
fn parse_field_reference(value: &Value, op_name: &str) -> Result<String> {
    match value.as_str() {
        Some(s) if s.len() > 1 && s.starts_with('$') => Ok(s[1..].to_string()),
        Some(_) => Err(invalid(format!(
            "{} field reference must start with $",
            op_name
        ))),
        None => Err(invalid(format!("{} must be a field reference", op_name))),
    }
}

/// Move an array out of the document, leaving an empty one in its place
fn take_array(doc: &mut Value, path: &str) -> Option<Vec<Value>> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.as_object_mut()?.get_mut(part)?;
    }
    match current {
        Value::Array(items) => Some(std::mem::take(items)),
        _ => None,
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Aggregation pipeline
///
/// Stages run in declared order; each consumes the full output of the
/// previous one.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Unwind(UnwindStage),
    Group(GroupStage),
    Match(MatchStage),
    Project(ProjectStage),
    Sort(SortStage),
    Limit(usize),
    Skip(usize),
}

/// $unwind stage - one output document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
    preserve_null_and_empty: bool,
    include_array_index: Option<String>,
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: GroupId,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupId {
    Field(String), // "$category"
    Null,          // null (all documents in one group)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    First(String),
    Last(String),
    Avg(String),
    Min(String),
    Max(String),
    Sum(SumExpression),
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SumExpression {
    Constant(Value), // {"$sum": 1} counts
    Field(String),   // {"$sum": "$amount"}
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Query,
}

/// $project stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
    include_mode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,        // 1
    Exclude,        // 0
    Rename(String), // "$fieldName"
}

/// $sort stage - stable multi-key sort
#[derive(Debug, Clone)]
pub struct SortStage {
    fields: Vec<(String, SortDirection)>,
}

// ============================================================================
// PIPELINE
// ============================================================================

impl Pipeline {
    /// Create pipeline from JSON array
    ///
    /// Every stage is compiled before anything runs; errors carry the
    /// zero-based index of the offending stage.
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let stages_array = pipeline_json
            .as_array()
            .ok_or_else(|| invalid("Pipeline must be an array"))?;
        if stages_array.is_empty() {
            return Err(invalid("Pipeline cannot be empty"));
        }

        let stages = stages_array
            .iter()
            .enumerate()
            .map(|(index, stage_json)| {
                Stage::from_json(stage_json).map_err(|e| e.at_stage(index))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline { stages })
    }

    /// Pipeline from already built stages; empty is rejected like in `from_json`
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(invalid("Pipeline cannot be empty"));
        }
        Ok(Pipeline { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Execute pipeline on documents
    pub fn execute(&self, mut docs: Vec<Value>) -> Vec<Value> {
        for (index, stage) in self.stages.iter().enumerate() {
            let input = docs.len();
            docs = stage.execute(docs);
            log_debug!(
                "stage {} ({}): {} -> {} documents",
                index,
                stage.name(),
                input,
                docs.len()
            );
        }
        docs
    }
}

impl Stage {
    /// `$unwind` on a path given with or without the leading `$`
    pub fn unwind(path: impl Into<String>) -> Self {
        let path = path.into();
        Stage::Unwind(UnwindStage {
            path: path.strip_prefix('$').unwrap_or(&path).to_string(),
            preserve_null_and_empty: false,
            include_array_index: None,
        })
    }

    pub fn group(id: GroupId, accumulators: Vec<(String, Accumulator)>) -> Self {
        Stage::Group(GroupStage { id, accumulators })
    }

    pub fn filter(query: Query) -> Self {
        Stage::Match(MatchStage { query })
    }

    pub fn project(fields: Vec<(String, ProjectField)>) -> Result<Self> {
        ProjectStage::new(fields).map(Stage::Project)
    }

    pub fn sort(fields: Vec<(String, SortDirection)>) -> Result<Self> {
        if fields.is_empty() {
            return Err(invalid("$sort needs at least one key"));
        }
        Ok(Stage::Sort(SortStage { fields }))
    }

    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = stage_json
            .as_object()
            .ok_or_else(|| invalid("Stage must be an object"))?;

        // Each stage should have exactly one key
        let mut entries = obj.iter();
        let (stage_name, stage_spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(invalid("Each stage must have exactly one operator")),
        };

        match stage_name.as_str() {
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(stage_spec)?)),
            "$limit" => Ok(Stage::Limit(parse_count(stage_spec, "$limit")?)),
            "$skip" => Ok(Stage::Skip(parse_count(stage_spec, "$skip")?)),
            _ => Err(invalid(format!("Unknown pipeline stage: {}", stage_name))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Unwind(_) => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        match self {
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Match(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Sort(stage) => stage.execute(docs),
            Stage::Limit(limit) => docs.into_iter().take(*limit).collect(),
            Stage::Skip(skip) => docs.into_iter().skip(*skip).collect(),
        }
    }
}

fn parse_count(spec: &Value, op_name: &str) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(format!("{} must be a non-negative integer", op_name)))
}

// ============================================================================
// $unwind
// ============================================================================

impl UnwindStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(_) => Ok(UnwindStage {
                path: parse_field_reference(spec, "$unwind")?,
                preserve_null_and_empty: false,
                include_array_index: None,
            }),
            Value::Object(obj) => {
                let path = obj
                    .get("path")
                    .ok_or_else(|| invalid("$unwind requires path"))
                    .and_then(|p| parse_field_reference(p, "$unwind path"))?;
                let preserve_null_and_empty = match obj.get("preserveNullAndEmptyArrays") {
                    None => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => {
                        return Err(invalid("preserveNullAndEmptyArrays must be a boolean"))
                    }
                };
                let include_array_index = match obj.get("includeArrayIndex") {
                    None => None,
                    Some(Value::String(s)) if !s.is_empty() && !s.starts_with('$') => {
                        Some(s.clone())
                    }
                    Some(_) => return Err(invalid("includeArrayIndex must be a field name")),
                };
                if let Some(key) = obj
                    .keys()
                    .find(|k| !matches!(k.as_str(), "path" | "preserveNullAndEmptyArrays" | "includeArrayIndex"))
                {
                    return Err(invalid(format!("Unknown $unwind option: {}", key)));
                }
                Ok(UnwindStage {
                    path,
                    preserve_null_and_empty,
                    include_array_index,
                })
            }
            _ => Err(invalid("$unwind must be a string or object")),
        }
    }

    /// Arrays fan out, one copy per element. A missing or non-array field
    /// passes the document through, with a `null` index when
    /// `includeArrayIndex` is set. An empty array drops the
    /// document unless `preserveNullAndEmptyArrays` is set, in which case
    /// the field is removed instead.
    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut results = Vec::with_capacity(docs.len());

        for mut doc in docs {
            let Some(items) = take_array(&mut doc, &self.path) else {
                if let Some(index_field) = &self.include_array_index {
                    set_nested_value(&mut doc, index_field, Value::Null);
                }
                results.push(doc);
                continue;
            };

            if items.is_empty() {
                if self.preserve_null_and_empty {
                    remove_nested_value(&mut doc, &self.path);
                    if let Some(index_field) = &self.include_array_index {
                        set_nested_value(&mut doc, index_field, Value::Null);
                    }
                    results.push(doc);
                }
                continue;
            }

            log_trace!("unwinding {} elements of '{}'", items.len(), self.path);
            for (index, item) in items.into_iter().enumerate() {
                let mut copy = doc.clone();
                set_nested_value(&mut copy, &self.path, item);
                if let Some(index_field) = &self.include_array_index {
                    set_nested_value(&mut copy, index_field, Value::from(index as u64));
                }
                results.push(copy);
            }
        }

        results
    }
}

// ============================================================================
// $group
// ============================================================================

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| invalid("$group must be an object"))?;

        let id = match obj.get(ID_FIELD) {
            None => return Err(invalid("Group stage must have _id field")),
            Some(Value::Null) => GroupId::Null,
            Some(id_value @ Value::String(_)) => {
                GroupId::Field(parse_field_reference(id_value, "Group _id")?)
            }
            Some(_) => return Err(invalid("Group _id must be null or field reference")),
        };

        let accumulators = obj
            .iter()
            .filter(|(field, _)| field.as_str() != ID_FIELD)
            .map(|(field, value)| {
                Accumulator::from_json(value)
                    .map(|acc| (field.clone(), acc))
                    .map_err(|e| invalid(format!("accumulator '{}': {}", field, reason_of(e))))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GroupStage { id, accumulators })
    }

    /// Groups are emitted in the order their key was first seen
    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();

        for doc in &docs {
            let key = match &self.id {
                GroupId::Null => Value::Null,
                GroupId::Field(path) => get_nested_value(doc, path).cloned().unwrap_or(Value::Null),
            };

            let slot = *index
                .entry(canonical_json_string(&key))
                .or_insert_with(|| {
                    groups.push((
                        key,
                        self.accumulators
                            .iter()
                            .map(|(_, acc)| AccumulatorState::new(acc))
                            .collect(),
                    ));
                    groups.len() - 1
                });

            for ((_, accumulator), state) in self.accumulators.iter().zip(groups[slot].1.iter_mut()) {
                state.feed(accumulator, doc);
            }
        }

        groups
            .into_iter()
            .map(|(key, states)| {
                let mut result = Map::with_capacity(self.accumulators.len() + 1);
                result.insert(ID_FIELD.to_string(), key);
                for ((field, _), state) in self.accumulators.iter().zip(states) {
                    result.insert(field.clone(), state.finish());
                }
                Value::Object(result)
            })
            .collect()
    }
}

fn reason_of(err: ShelfError) -> String {
    match err {
        ShelfError::Configuration { reason, .. } => reason,
        other => other.to_string(),
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| invalid("Accumulator must be an object"))?;
        let mut entries = obj.iter();
        let (op, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(invalid("Accumulator must have exactly one operator")),
        };

        match op.as_str() {
            "$sum" => match value {
                Value::Number(_) => Ok(Accumulator::Sum(SumExpression::Constant(value.clone()))),
                _ => Ok(Accumulator::Sum(SumExpression::Field(parse_field_reference(
                    value, "$sum",
                )?))),
            },
            "$avg" => Ok(Accumulator::Avg(parse_field_reference(value, "$avg")?)),
            "$min" => Ok(Accumulator::Min(parse_field_reference(value, "$min")?)),
            "$max" => Ok(Accumulator::Max(parse_field_reference(value, "$max")?)),
            "$first" => Ok(Accumulator::First(parse_field_reference(value, "$first")?)),
            "$last" => Ok(Accumulator::Last(parse_field_reference(value, "$last")?)),
            "$count" => match value {
                Value::Object(args) if args.is_empty() => Ok(Accumulator::Count),
                _ => Err(invalid("$count takes an empty object")),
            },
            _ => Err(invalid(format!("Unknown accumulator: {}", op))),
        }
    }
}

/// Running value of one accumulator within one group
#[derive(Debug)]
enum AccumulatorState {
    Pick(Option<Value>),
    Sum { int: i64, float: f64, has_float: bool },
    Avg { sum: f64, count: u64 },
    Extremum(Option<Value>),
    Count(u64),
}

impl AccumulatorState {
    fn new(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::First(_) | Accumulator::Last(_) => AccumulatorState::Pick(None),
            Accumulator::Sum(_) => AccumulatorState::Sum {
                int: 0,
                float: 0.0,
                has_float: false,
            },
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) | Accumulator::Max(_) => AccumulatorState::Extremum(None),
            Accumulator::Count => AccumulatorState::Count(0),
        }
    }

    fn feed(&mut self, accumulator: &Accumulator, doc: &Value) {
        match (self, accumulator) {
            (AccumulatorState::Pick(slot), Accumulator::First(field)) => {
                if slot.is_none() {
                    *slot = Some(get_nested_value(doc, field).cloned().unwrap_or(Value::Null));
                }
            }
            (AccumulatorState::Pick(slot), Accumulator::Last(field)) => {
                *slot = Some(get_nested_value(doc, field).cloned().unwrap_or(Value::Null));
            }
            (AccumulatorState::Sum { int, float, has_float }, Accumulator::Sum(expr)) => {
                let value = match expr {
                    SumExpression::Constant(n) => Some(n),
                    SumExpression::Field(field) => get_nested_value(doc, field),
                };
                match value {
                    Some(Value::Number(n)) => match n.as_i64() {
                        Some(i) if !*has_float => match int.checked_add(i) {
                            Some(next) => *int = next,
                            None => {
                                *float += *int as f64 + i as f64;
                                *int = 0;
                                *has_float = true;
                            }
                        },
                        _ => {
                            *float += n.as_f64().unwrap_or(0.0);
                            *has_float = true;
                        }
                    },
                    // non-numeric values do not contribute
                    _ => {}
                }
            }
            (AccumulatorState::Avg { sum, count }, Accumulator::Avg(field)) => {
                if let Some(n) = get_nested_value(doc, field).and_then(as_number) {
                    *sum += n;
                    *count += 1;
                }
            }
            (AccumulatorState::Extremum(best), Accumulator::Min(field) | Accumulator::Max(field)) => {
                let Some(candidate) = get_nested_value(doc, field).filter(|v| v.is_number()) else {
                    return;
                };
                let wanted = if matches!(accumulator, Accumulator::Min(_)) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
                let replace = match best {
                    None => true,
                    Some(current) => sort_compare(Some(candidate), Some(current)) == wanted,
                };
                if replace {
                    *best = Some(candidate.clone());
                }
            }
            (AccumulatorState::Count(n), Accumulator::Count) => *n += 1,
            _ => {}
        }
    }

    fn finish(self) -> Value {
        match self {
            AccumulatorState::Pick(value) | AccumulatorState::Extremum(value) => {
                value.unwrap_or(Value::Null)
            }
            AccumulatorState::Sum { int, float, has_float } => {
                if has_float {
                    Value::from(float + int as f64)
                } else {
                    Value::from(int)
                }
            }
            AccumulatorState::Avg { sum, count } => {
                if count > 0 {
                    Value::from(sum / count as f64)
                } else {
                    Value::Null
                }
            }
            AccumulatorState::Count(n) => Value::from(n),
        }
    }
}

// ============================================================================
// $match
// ============================================================================

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let query = Query::from_json(spec)?;
        Ok(MatchStage { query })
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter().filter(|doc| self.query.matches(doc)).collect()
    }
}

// ============================================================================
// $project
// ============================================================================

impl ProjectStage {
    fn new(fields: Vec<(String, ProjectField)>) -> Result<Self> {
        let has_inclusions = fields
            .iter()
            .any(|(_, f)| matches!(f, ProjectField::Include | ProjectField::Rename(_)));
        let non_id_exclusion = fields
            .iter()
            .find(|(field, f)| matches!(f, ProjectField::Exclude) && field != ID_FIELD);

        if let (true, Some((field, _))) = (has_inclusions, non_id_exclusion) {
            return Err(invalid(format!(
                "$project cannot exclude '{}' while including other fields",
                field
            )));
        }

        Ok(ProjectStage {
            include_mode: has_inclusions,
            fields,
        })
    }

    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .filter(|obj| !obj.is_empty())
            .ok_or_else(|| invalid("$project must be a non-empty object"))?;

        let fields = obj
            .iter()
            .map(|(field, value)| {
                let action = match value {
                    Value::Bool(true) => ProjectField::Include,
                    Value::Bool(false) => ProjectField::Exclude,
                    Value::Number(n) => match n.as_i64() {
                        Some(1) => ProjectField::Include,
                        Some(0) => ProjectField::Exclude,
                        _ => return Err(invalid(format!("Invalid project value: {}", n))),
                    },
                    Value::String(s) if s.starts_with('$') => {
                        ProjectField::Rename(parse_field_reference(value, "$project")?)
                    }
                    Value::String(s) => {
                        return Err(invalid(format!("Invalid project expression: {}", s)))
                    }
                    _ => {
                        return Err(invalid(
                            "Project field must be 0, 1, or field reference",
                        ))
                    }
                };
                Ok((field.clone(), action))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(fields)
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.iter().map(|doc| self.project_document(doc)).collect()
    }

    fn project_document(&self, doc: &Value) -> Value {
        if !self.include_mode {
            let mut result = doc.clone();
            for (field, _) in &self.fields {
                remove_resolved_path(&mut result, field);
            }
            return result;
        }

        let mut result = Value::Object(Map::new());
        let id_mentioned = self.fields.iter().any(|(field, _)| field == ID_FIELD);
        if !id_mentioned {
            if let Some(id) = doc.get(ID_FIELD) {
                merge_into(&mut result, single_field(ID_FIELD, id.clone()));
            }
        }

        for (field, action) in &self.fields {
            match action {
                ProjectField::Include => {
                    let parts: Vec<&str> = field.split('.').collect();
                    if let Some(extracted) = extract_path(doc, &parts) {
                        merge_into(&mut result, extracted);
                    }
                }
                ProjectField::Rename(source) => {
                    if let Some(value) = reference_value(doc, source) {
                        set_nested_value(&mut result, field, value);
                    }
                }
                ProjectField::Exclude => {}
            }
        }

        result
    }
}

// ============================================================================
// $sort
// ============================================================================

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let fields = parse_sort_spec(spec).map_err(|e| invalid(format!("$sort: {}", reason_of(e))))?;
        Ok(SortStage { fields })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Vec<Value> {
        apply_sort(&mut docs, &self.fields);
        docs
    }
}
