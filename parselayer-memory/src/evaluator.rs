//! `where` clause evaluation for in-memory object filtering.
//!
//! This module provides the evaluation engine for the constraint maps sent by queries,
//! supporting literal equality, comparison, set, existence and literal-regex operators as
//! well as `$or`, sub-queries and relations.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use parselayer::error::{ApiError, ParseError, ParseResult};

use crate::store::Classes;

fn invalid_query(message: impl Into<String>) -> ParseError {
    ParseError::Api(ApiError::new(ApiError::INVALID_QUERY, message))
}

/// Comparable view of wire values.
///
/// Numbers are normalized to f64, Date objects to timestamps, and Pointers compare by
/// class and object id.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    Date(DateTime<Utc>),
    String(&'a str),
    Pointer(&'a str, &'a str),
    Array(Vec<Comparable<'a>>),
    Map(&'a Map<String, Value>),
}

fn parse_date(iso: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl<'a> From<&'a Value> for Comparable<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Null => Comparable::Null,
            Value::Bool(b) => Comparable::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(Comparable::Null, Comparable::Number),
            Value::String(s) => Comparable::String(s),
            Value::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Value::Object(map) => {
                let text = |key: &str| map.get(key).and_then(Value::as_str);
                match text("__type") {
                    Some("Date") => text("iso")
                        .and_then(parse_date)
                        .map_or(Comparable::Map(map), Comparable::Date),
                    Some("Pointer") | Some("Object") => match (text("className"), text("objectId")) {
                        (Some(class), Some(id)) => Comparable::Pointer(class, id),
                        _ => Comparable::Map(map),
                    },
                    _ => Comparable::Map(map),
                }
            }
        }
    }
}

impl Comparable<'_> {
    /// Timestamps are stored as ISO strings but queried as Date objects.
    fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Comparable::Date(dt) => Some(*dt),
            Comparable::String(s) => parse_date(s),
            _ => None,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Pointer(ac, ai), Comparable::Pointer(bc, bi)) => ac == bc && ai == bi,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Date(_), _) | (_, Comparable::Date(_)) => {
                matches!((self.as_date(), other.as_date()), (Some(a), Some(b)) if a == b)
            }
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Date(_), _) | (_, Comparable::Date(_)) => {
                self.as_date()?.partial_cmp(&other.as_date()?)
            }
            _ => None,
        }
    }
}

/// Returns the literal text of a pattern built by `parselayer::query::quote`, with its
/// anchors.
fn unquote(pattern: &str) -> Option<(bool, &str, bool)> {
    let (anchored_start, rest) = match pattern.strip_prefix('^') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let (anchored_end, rest) = match rest.strip_suffix('$') {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let body = rest.strip_prefix("\\Q")?.strip_suffix("\\E")?;
    Some((anchored_start, body, anchored_end))
}

fn regex_matches(value: &str, pattern: &str, options: &str) -> ParseResult<bool> {
    let (start, quoted, end) = unquote(pattern)
        .ok_or_else(|| invalid_query(format!("unsupported $regex pattern {:?}", pattern)))?;
    let literal = quoted.replace("\\E\\\\E\\Q", "\\E");

    let (value, literal) = if options.contains('i') {
        (value.to_lowercase(), literal.to_lowercase())
    } else {
        (value.to_owned(), literal)
    };
    Ok(match (start, end) {
        (true, true) => value == literal,
        (true, false) => value.starts_with(&literal),
        (false, true) => value.ends_with(&literal),
        (false, false) => value.contains(&literal),
    })
}

/// Evaluates constraint maps against the objects of one class.
pub(crate) struct ObjectEvaluator<'a, 'n> {
    classes: &'a Classes,
    class_name: &'n str,
}

impl<'a, 'n> ObjectEvaluator<'a, 'n> {
    pub fn new(classes: &'a Classes, class_name: &'n str) -> Self {
        Self { classes, class_name }
    }

    /// Returns the objects of the class matching `constraints`, in object id order.
    pub fn filter_objects(&self, constraints: &Map<String, Value>) -> ParseResult<Vec<&'a Map<String, Value>>> {
        let Some(objects) = self.classes.get(self.class_name) else {
            return Ok(Vec::new());
        };
        let mut matched = Vec::new();
        for object in objects.values() {
            if self.evaluate(object, constraints)? {
                matched.push(object);
            }
        }
        Ok(matched)
    }

    pub fn evaluate(&self, object: &Map<String, Value>, constraints: &Map<String, Value>) -> ParseResult<bool> {
        for (key, condition) in constraints {
            let matched = match key.as_str() {
                "$or" => self.visit_or(object, condition)?,
                "$relatedTo" => self.visit_related_to(object, condition)?,
                field => self.visit_field(object.get(field), condition)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn visit_or(&self, object: &Map<String, Value>, branches: &Value) -> ParseResult<bool> {
        let Value::Array(branches) = branches else {
            return Err(invalid_query("$or expects an array"));
        };
        for branch in branches {
            let Value::Object(branch) = branch else {
                return Err(invalid_query("$or expects constraint objects"));
            };
            if self.evaluate(object, branch)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn visit_related_to(&self, object: &Map<String, Value>, relation: &Value) -> ParseResult<bool> {
        let (Some(Comparable::Pointer(class, id)), Some(key)) = (
            relation.get("object").map(Comparable::from),
            relation.get("key").and_then(Value::as_str),
        ) else {
            return Err(invalid_query("$relatedTo expects an object pointer and a key"));
        };
        let Some(own_id) = object.get("objectId").and_then(Value::as_str) else {
            return Ok(false);
        };
        let member = Comparable::Pointer(self.class_name, own_id);
        Ok(self
            .classes
            .get(class)
            .and_then(|objects| objects.get(id))
            .and_then(|parent| parent.get(key))
            .map(|members| match Comparable::from(members) {
                Comparable::Array(items) => items.contains(&member),
                single => single == member,
            })
            .unwrap_or(false))
    }

    fn visit_field(&self, value: Option<&Value>, condition: &Value) -> ParseResult<bool> {
        match condition {
            Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                for (op, operand) in ops {
                    if !self.visit_operator(value, op, operand, ops)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            literal => Ok(value.is_some_and(|v| equals(v, literal))),
        }
    }

    fn visit_operator(
        &self,
        value: Option<&Value>,
        op: &str,
        operand: &Value,
        ops: &Map<String, Value>,
    ) -> ParseResult<bool> {
        match op {
            "$ne" => Ok(!value.is_some_and(|v| equals(v, operand))),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                let Some(value) = value else {
                    return Ok(false);
                };
                Ok(match Comparable::from(value).partial_cmp(&Comparable::from(operand)) {
                    Some(ordering) => match op {
                        "$gt" => ordering == Ordering::Greater,
                        "$gte" => ordering != Ordering::Less,
                        "$lt" => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    },
                    None => false,
                })
            }
            "$in" => Ok(value.is_some_and(|v| any_of(v, operand))),
            "$nin" => Ok(!value.is_some_and(|v| any_of(v, operand))),
            "$all" => {
                let (Some(Value::Array(items)), Value::Array(required)) = (value, operand) else {
                    return Ok(false);
                };
                Ok(required.iter().all(|r| items.iter().any(|item| equals_scalar(item, r))))
            }
            "$exists" => Ok(value.is_some() == operand.as_bool().unwrap_or(true)),
            "$regex" => {
                let (Some(Value::String(text)), Value::String(pattern)) = (value, operand) else {
                    return Ok(false);
                };
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or_default();
                regex_matches(text, pattern, options)
            }
            "$options" => Ok(true),
            "$select" => self.visit_select(value, operand),
            "$dontSelect" => self.visit_select(value, operand).map(|hit| !hit),
            "$inQuery" => self.visit_in_query(value, operand),
            "$notInQuery" => self.visit_in_query(value, operand).map(|hit| !hit),
            "$within" | "$nearSphere" | "$maxDistanceInMiles" | "$maxDistanceInKilometers"
            | "$maxDistanceInRadians" => Err(invalid_query(format!("{} is not supported in memory", op))),
            other => Err(invalid_query(format!("unknown operator {}", other))),
        }
    }

    fn subquery(&self, document: &Value) -> ParseResult<Vec<&'a Map<String, Value>>> {
        let Some(class_name) = document.get("className").and_then(Value::as_str) else {
            return Err(invalid_query("sub-query without className"));
        };
        let constraints = match document.get("where") {
            Some(Value::Object(constraints)) => constraints.clone(),
            Some(_) => return Err(invalid_query("sub-query where must be an object")),
            None => Map::new(),
        };
        let mut objects = ObjectEvaluator { classes: self.classes, class_name }.filter_objects(&constraints)?;
        let skip = document.get("skip").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = document.get("limit").and_then(Value::as_u64).map_or(usize::MAX, |l| l as usize);
        objects = objects.into_iter().skip(skip).take(limit).collect();
        Ok(objects)
    }

    fn visit_select(&self, value: Option<&Value>, select: &Value) -> ParseResult<bool> {
        let (Some(key), Some(document)) = (select.get("key").and_then(Value::as_str), select.get("query")) else {
            return Err(invalid_query("$select expects a key and a query"));
        };
        let Some(value) = value else {
            return Ok(false);
        };
        Ok(self
            .subquery(document)?
            .into_iter()
            .filter_map(|object| object.get(key))
            .any(|selected| equals_scalar(value, selected)))
    }

    fn visit_in_query(&self, value: Option<&Value>, document: &Value) -> ParseResult<bool> {
        let Some(Comparable::Pointer(class, id)) = value.map(Comparable::from) else {
            return Ok(false);
        };
        if document.get("className").and_then(Value::as_str) != Some(class) {
            return Ok(false);
        }
        Ok(self
            .subquery(document)?
            .into_iter()
            .any(|object| object.get("objectId").and_then(Value::as_str) == Some(id)))
    }
}

fn equals_scalar(left: &Value, right: &Value) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Literal equality; an array field matches a scalar it contains.
fn equals(value: &Value, literal: &Value) -> bool {
    match (value, literal) {
        (Value::Array(items), literal) if !literal.is_array() => {
            items.iter().any(|item| equals_scalar(item, literal))
        }
        _ => equals_scalar(value, literal),
    }
}

fn any_of(value: &Value, candidates: &Value) -> bool {
    let Value::Array(candidates) = candidates else {
        return false;
    };
    candidates.iter().any(|candidate| equals(value, candidate))
}
