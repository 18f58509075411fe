//! Core traits for records and their field sets.
//!
//! A [`FieldSet`] is any shape whose fields map onto a flat wire object. A [`Record`] is a
//! field set that lives in a named class on the server and can be addressed by object id.
//! Both are normally derived:
//!
//! ```ignore
//! use parselayer::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Record)]
//! #[parse(class = "GameScore")]
//! pub struct GameScore {
//!     #[parse(flatten)]
//!     pub base: Base,
//!     pub player_name: String,
//!     pub score: i64,
//!     #[parse(rename = "cheatMode", omit_empty)]
//!     pub cheating: bool,
//!     #[parse(extra)]
//!     pub extra: serde_json::Map<String, serde_json::Value>,
//! }
//! ```

use serde_json::{Map, Value, json};
use std::{any::Any, fmt::Debug};

use crate::{
    error::{ConvertError, ConvertResult},
    metadata::{FieldKey, Shape, key_for},
    wire::{FromWire, ToWire, normalize},
};

/// Wire keys that describe a value rather than carry one of its fields.
const RESERVED_KEYS: [&str; 2] = ["__type", "className"];

/// Keys that the server owns and that are never sent in create/update payloads.
const SERVER_KEYS: [&str; 3] = ["objectId", "createdAt", "updatedAt"];

/// A shape that can be decoded from and encoded to a flat wire object.
///
/// Implemented by `#[derive(Record)]` and `#[derive(Fields)]`.
pub trait FieldSet: Send + Sync + 'static {
    /// Returns the static descriptor of this shape.
    fn shape() -> &'static Shape
    where
        Self: Sized;

    /// Decodes `value` into the field addressed by `key`.
    ///
    /// Returns `Ok(false)` if no field of this shape (including flattened shapes) is
    /// addressed by `key`.
    fn decode_field(&mut self, key: &FieldKey<'_>, value: &Value) -> ConvertResult<bool>;

    /// Returns the current wire value of the field addressed by `key`.
    fn encode_field(&self, key: &FieldKey<'_>) -> Option<Value>;

    /// Writes every outgoing field of this shape into `out` under its wire name.
    fn encode_fields(&self, out: &mut Map<String, Value>);

    /// The bag that collects wire fields with no declared counterpart, if the shape has one.
    fn extra_mut(&mut self) -> Option<&mut Map<String, Value>> {
        None
    }

    /// The object id, for shapes that carry one.
    fn object_id(&self) -> Option<&str> {
        None
    }
}

/// A field set stored in a named server class.
pub trait Record: FieldSet + FromWire + ToWire + Clone + Debug {
    /// Returns the server class name: the type name unless overridden with
    /// `#[parse(class = "...")]`.
    fn class_name() -> &'static str;

    /// Returns the endpoint base that addresses this record's class.
    fn endpoint() -> String {
        endpoint_for(Self::class_name())
    }
}

/// Maps a class name onto its endpoint base.
///
/// The built-in classes have dedicated endpoints, every other class lives under `classes/`.
pub fn endpoint_for(class_name: &str) -> String {
    match class_name {
        "_User" => "users".to_owned(),
        "_Role" => "roles".to_owned(),
        "_Installation" => "installations".to_owned(),
        other => format!("classes/{}", other),
    }
}

/// Decodes the wire object `value` into `dst` field by field.
///
/// Keys that match no declared field are collected in the shape's extra bag when it has
/// one and dropped otherwise. Fields absent from `value` are left untouched.
///
/// # Errors
///
/// Returns a [`ConvertError`] naming the offending field if any field fails to decode, or
/// if `value` is not an object.
pub fn decode_fields<F: FieldSet>(dst: &mut F, value: &Value) -> ConvertResult<()> {
    let Value::Object(source) = value else {
        return Err(ConvertError::mismatch("object", value));
    };

    let map = F::shape().field_map();
    for (key, item) in source {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let normalized = normalize(key);
        let field = key_for(&map, key, &normalized);
        if !dst.decode_field(&field, item).map_err(|err| err.at(key.as_str()))? {
            if let Some(extra) = dst.extra_mut() {
                extra.insert(key.clone(), item.clone());
            }
        }
    }
    Ok(())
}

/// Returns `true` if `value` is a Pointer object.
pub fn is_pointer(value: &Value) -> bool {
    value.get("__type").and_then(Value::as_str) == Some("Pointer")
}

/// Decodes a full object or a Pointer into a record.
///
/// A Pointer yields a record with only its object id set.
pub fn decode_record<R: Record + Default>(dst: &mut R, value: &Value) -> ConvertResult<()> {
    if is_pointer(value) {
        *dst = R::default();
    }
    decode_fields(dst, value)
}

/// Encodes a record as a Pointer to its class and object id.
pub fn pointer_to<R: Record>(record: &R) -> Value {
    json!({
        "__type": "Pointer",
        "className": R::class_name(),
        "objectId": FieldSet::object_id(record).unwrap_or_default(),
    })
}

/// Encodes the outgoing create/update payload of a record.
///
/// Server-owned fields are never included.
pub fn encode_payload<F: FieldSet>(record: &F) -> Map<String, Value> {
    let mut out = Map::new();
    record.encode_fields(&mut out);
    for key in SERVER_KEYS {
        out.remove(key);
    }
    out
}

/// Type-erased record trait for values whose class is only known at decode time.
///
/// Every [`Record`] implements it; see [`Object`](crate::object::Object).
pub trait AnyRecord: Send + Sync + Debug {
    /// Returns the server class name of this record.
    fn record_class(&self) -> &'static str;

    /// Returns the object id of this record, if it has one.
    fn record_id(&self) -> Option<&str>;

    /// Returns a reference to the record as a generic `Any` type.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable reference to the record as a generic `Any` type.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Clones the record into a new boxed `AnyRecord`.
    fn clone_box(&self) -> Box<dyn AnyRecord>;

    /// Encodes the record as a Pointer.
    fn to_pointer(&self) -> Value;
}

impl dyn AnyRecord {
    /// Attempts to downcast a reference to a specific record type.
    ///
    /// Returns `Some(&R)` if this trait object contains an `R`, otherwise `None`.
    pub fn downcast_ref<R: Record>(&self) -> Option<&R> {
        self.as_any().downcast_ref::<R>()
    }

    /// Attempts to downcast a mutable reference to a specific record type.
    pub fn downcast_mut<R: Record>(&mut self) -> Option<&mut R> {
        self.as_any_mut().downcast_mut::<R>()
    }
}

impl<R: Record> AnyRecord for R {
    fn record_class(&self) -> &'static str {
        R::class_name()
    }

    fn record_id(&self) -> Option<&str> {
        FieldSet::object_id(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn AnyRecord> {
        Box::new(self.clone())
    }

    fn to_pointer(&self) -> Value {
        pointer_to(self)
    }
}

impl Clone for Box<dyn AnyRecord> {
    fn clone(&self) -> Box<dyn AnyRecord> {
        self.clone_box()
    }
}
