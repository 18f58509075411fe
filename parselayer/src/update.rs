//! Partial updates of saved records.
//!
//! An [`Update`] collects per-field operations, sends them in a single PUT and, once the
//! service accepted them, applies them to the in-memory record so it reflects the new
//! state without a re-fetch.
//!
//! ```ignore
//! let mut update = client.update(&mut score);
//! update.increment("score", 10).add_unique("skills", ["flying"]).delete("cheatMode");
//! update.execute().await?;
//! ```

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::{
    client::{Client, require_id},
    error::{ParseError, ParseResult},
    metadata::{FieldKind, key_for},
    record::Record,
    response::merge_object,
    transport::{Method, Request},
    types::Acl,
    wire::{ToWire, integral, normalize},
};

/// One update operation on a field.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Replace the value.
    Set(Value),
    /// Add a number to the value.
    Increment(Value),
    /// Remove the field.
    Delete,
    /// Append to an array.
    Add(Vec<Value>),
    /// Append the values not already present in an array.
    AddUnique(Vec<Value>),
    /// Remove every occurrence of the values from an array.
    Remove(Vec<Value>),
}

impl UpdateOp {
    /// Returns the wire form of the operation: the value itself for `Set`, an
    /// `{"__op": ..}` object otherwise.
    pub fn to_wire(&self) -> Value {
        match self {
            UpdateOp::Set(value) => value.clone(),
            UpdateOp::Increment(amount) => json!({"__op": "Increment", "amount": amount}),
            UpdateOp::Delete => json!({"__op": "Delete"}),
            UpdateOp::Add(objects) => json!({"__op": "Add", "objects": objects}),
            UpdateOp::AddUnique(objects) => json!({"__op": "AddUnique", "objects": objects}),
            UpdateOp::Remove(objects) => json!({"__op": "Remove", "objects": objects}),
        }
    }
}

/// A pending update of one record. Created by [`Client::update`].
#[derive(Debug)]
pub struct Update<'a, R> {
    client: Client,
    record: &'a mut R,
    ops: BTreeMap<String, UpdateOp>,
    use_master_key: bool,
}

impl<'a, R: Record> Update<'a, R> {
    pub(crate) fn new(client: Client, record: &'a mut R) -> Self {
        Self { client, record, ops: BTreeMap::new(), use_master_key: false }
    }

    fn op(&mut self, field: &str, op: UpdateOp) -> &mut Self {
        self.ops.insert(field.to_owned(), op);
        self
    }

    pub fn set(&mut self, field: &str, value: impl ToWire) -> &mut Self {
        self.op(field, UpdateOp::Set(value.to_wire()))
    }

    /// Adds `amount` to a numeric field. The service applies the addition atomically.
    pub fn increment(&mut self, field: &str, amount: impl ToWire) -> &mut Self {
        self.op(field, UpdateOp::Increment(amount.to_wire()))
    }

    /// Removes a field. Locally the field is reset to its zero value.
    pub fn delete(&mut self, field: &str) -> &mut Self {
        self.op(field, UpdateOp::Delete)
    }

    pub fn add<I>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: ToWire,
    {
        self.op(field, UpdateOp::Add(values.into_iter().map(|v| v.to_wire()).collect()))
    }

    pub fn add_unique<I>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: ToWire,
    {
        self.op(field, UpdateOp::AddUnique(values.into_iter().map(|v| v.to_wire()).collect()))
    }

    pub fn remove<I>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: ToWire,
    {
        self.op(field, UpdateOp::Remove(values.into_iter().map(|v| v.to_wire()).collect()))
    }

    /// Replaces the record's access control list.
    pub fn set_acl(&mut self, acl: &Acl) -> &mut Self {
        self.set("ACL", acl)
    }

    pub fn use_master_key(&mut self) -> &mut Self {
        self.use_master_key = true;
        self
    }

    /// Returns the JSON body the update sends.
    pub fn payload(&self) -> Map<String, Value> {
        self.ops
            .iter()
            .map(|(field, op)| (field.clone(), op.to_wire()))
            .collect()
    }

    /// Sends the update and applies it to the record.
    ///
    /// The operations are checked against the record before anything is sent. Fields the
    /// record doesn't declare are sent but not applied locally.
    ///
    /// # Errors
    ///
    /// - [`ParseError::InvalidArgument`] if the record has no object id, or an operation
    ///   doesn't fit its field (an increment of a non-numeric field, or an amount that
    ///   can't be converted to the field's number type without loss)
    /// - [`ParseError::Conversion`] if an operation's result doesn't fit its field
    /// - the service error if the update was rejected, in which case the record is left
    ///   unchanged
    #[instrument(skip(self), fields(class = R::class_name()))]
    pub async fn execute(self) -> ParseResult<()> {
        let id = require_id(&*self.record)?.to_owned();

        let mut staged = self.record.clone();
        for (field, op) in &self.ops {
            apply(&mut staged, field, op)?;
        }

        let body = serde_json::to_vec(&Value::Object(self.payload()))?;
        let request = Request::new(Method::Put, format!("{}/{}", R::endpoint(), id))
            .with_json(body)
            .with_master_key(self.use_master_key);
        let response = self.client.perform(request).await?;

        *self.record = staged;
        merge_object(&response, self.record)?;
        debug!(object_id = %id, fields = self.ops.len(), "Updated object");
        Ok(())
    }
}

/// Applies one operation to the declared field addressed by `field`.
fn apply<R: Record>(record: &mut R, field: &str, op: &UpdateOp) -> ParseResult<()> {
    let shape = R::shape();
    let map = shape.field_map();
    let normalized = normalize(field);
    let key = key_for(&map, field, &normalized);
    let Some(descriptor) = shape.find(&key) else {
        return Ok(());
    };
    let kind = (descriptor.kind)();

    let next = match op {
        UpdateOp::Set(value) => value.clone(),
        UpdateOp::Delete => Value::Null,
        UpdateOp::Increment(amount) => {
            let current = record.encode_field(&key).unwrap_or(Value::Null);
            incremented(kind, &current, amount)
                .map_err(|msg| ParseError::InvalidArgument(format!("cannot increment {}: {}", field, msg)))?
        }
        UpdateOp::Add(values) | UpdateOp::AddUnique(values) | UpdateOp::Remove(values) => {
            if !matches!(kind, FieldKind::List | FieldKind::Value) {
                return Err(ParseError::InvalidArgument(format!("{} is not an array field", field)));
            }
            let mut items = match record.encode_field(&key) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(ParseError::InvalidArgument(format!("{} does not hold an array", field)));
                }
            };
            match op {
                UpdateOp::Add(_) => items.extend(values.iter().cloned()),
                UpdateOp::AddUnique(_) => {
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
                _ => items.retain(|item| !values.contains(item)),
            }
            Value::Array(items)
        }
    };

    record
        .decode_field(&key, &next)
        .map_err(|err| ParseError::from(err.at(field)))?;
    Ok(())
}

/// Adds `amount` to `current` within the numeric family of the field.
///
/// Integer fields take any amount that is a whole number; the sum must fit the field,
/// which decoding checks. Float fields take any number.
fn incremented(kind: FieldKind, current: &Value, amount: &Value) -> Result<Value, String> {
    let Value::Number(amount) = amount else {
        return Err("amount is not a number".to_owned());
    };
    let current = match current {
        Value::Number(n) => Some(n),
        Value::Null => None,
        _ => return Err("field does not hold a number".to_owned()),
    };

    match kind {
        FieldKind::Int | FieldKind::Uint => {
            let delta = integral(amount)
                .ok_or_else(|| format!("{} can not be added to an integer field without loss", amount))?;
            let base = match current {
                Some(n) => integral(n).ok_or_else(|| format!("{} is not an integer", n))?,
                None => 0,
            };
            let sum = base.checked_add(delta).ok_or("sum overflows")?;
            if let Ok(sum) = i64::try_from(sum) {
                Ok(Value::from(sum))
            } else if let Ok(sum) = u64::try_from(sum) {
                Ok(Value::from(sum))
            } else {
                Err("sum overflows".to_owned())
            }
        }
        FieldKind::Float => {
            let base = current.and_then(|n| n.as_f64()).unwrap_or(0.0);
            let delta = amount.as_f64().ok_or("amount is not a finite number")?;
            Ok((base + delta).to_wire())
        }
        _ => Err("not a numeric field".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_encode_as_op_objects() {
        assert_eq!(UpdateOp::Set(json!(5)).to_wire(), json!(5));
        assert_eq!(UpdateOp::Delete.to_wire(), json!({"__op": "Delete"}));
        assert_eq!(
            UpdateOp::Increment(json!(2)).to_wire(),
            json!({"__op": "Increment", "amount": 2})
        );
        assert_eq!(
            UpdateOp::AddUnique(vec![json!("a")]).to_wire(),
            json!({"__op": "AddUnique", "objects": ["a"]})
        );
    }

    #[test]
    fn integer_families_take_whole_amounts_only() {
        assert_eq!(incremented(FieldKind::Int, &json!(3), &json!(2)), Ok(json!(5)));
        assert_eq!(incremented(FieldKind::Int, &json!(3), &json!(2.0)), Ok(json!(5)));
        assert_eq!(incremented(FieldKind::Uint, &Value::Null, &json!(4)), Ok(json!(4)));
        assert!(incremented(FieldKind::Int, &json!(3), &json!(2.5)).is_err());
    }

    #[test]
    fn float_family_takes_any_number() {
        assert_eq!(incremented(FieldKind::Float, &json!(1.5), &json!(2)), Ok(json!(3.5)));
    }

    #[test]
    fn other_families_are_rejected() {
        assert!(incremented(FieldKind::String, &json!("a"), &json!(1)).is_err());
        assert!(incremented(FieldKind::Value, &json!(1), &json!(1)).is_err());
        assert!(incremented(FieldKind::Int, &json!(1), &json!("1")).is_err());
    }
}
