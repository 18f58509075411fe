//! Polymorphic object slots and the process-wide class registry.
//!
//! A field typed [`Object`] accepts any wire value. Objects carrying a registered
//! `className` decode into their concrete record type, File objects decode into
//! [`File`], and everything else is kept verbatim.

use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{OnceLock, PoisonError, RwLock},
};

use crate::{
    builtin::{Role, User},
    error::ConvertResult,
    metadata::FieldKind,
    record::{AnyRecord, Record},
    types::File,
    wire::{FromWire, ToWire, decode},
};

/// A value whose concrete type is resolved from its wire form at decode time.
#[derive(Debug, Clone)]
pub enum Object {
    /// An object of a registered class.
    Record(Box<dyn AnyRecord>),
    File(File),
    /// Any other value, unchanged.
    Raw(Value),
}

impl Default for Object {
    fn default() -> Self {
        Object::Raw(Value::Null)
    }
}

impl Object {
    /// Returns the record if this slot holds one of type `R`.
    pub fn as_record<R: Record>(&self) -> Option<&R> {
        match self {
            Object::Record(record) => record.downcast_ref::<R>(),
            _ => None,
        }
    }

    /// Returns the class name of the held record.
    pub fn class_name(&self) -> Option<&'static str> {
        match self {
            Object::Record(record) => Some(record.record_class()),
            _ => None,
        }
    }
}

impl<R: Record> From<R> for Object {
    fn from(record: R) -> Self {
        Object::Record(Box::new(record))
    }
}

impl ToWire for Object {
    fn to_wire(&self) -> Value {
        match self {
            Object::Record(record) => record.to_pointer(),
            Object::File(file) => file.to_wire(),
            Object::Raw(value) => value.clone(),
        }
    }

    fn is_empty_wire(&self) -> bool {
        matches!(self, Object::Raw(Value::Null))
    }
}

impl FromWire for Object {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        let class = value.get("className").and_then(Value::as_str);
        *self = match class.and_then(registry::lookup) {
            Some(factory) => Object::Record(factory(value)?),
            None if File::is_file(value) => Object::File(decode(value)?),
            None => Object::Raw(value.clone()),
        };
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Object
    }
}

pub mod registry {
    //! Class name to record type registry used when decoding [`Object`](super::Object)
    //! slots. `_User` and `_Role` are registered from the start; other classes must be
    //! registered before decoding values that should resolve to them.

    use super::*;

    type Factory = fn(&Value) -> ConvertResult<Box<dyn AnyRecord>>;

    fn instantiate<R: Record>(value: &Value) -> ConvertResult<Box<dyn AnyRecord>> {
        Ok(Box::new(decode::<R>(value)?))
    }

    fn classes() -> &'static RwLock<HashMap<String, Factory>> {
        static CLASSES: OnceLock<RwLock<HashMap<String, Factory>>> = OnceLock::new();
        CLASSES.get_or_init(|| {
            let mut classes = HashMap::new();
            classes.insert(User::class_name().to_owned(), instantiate::<User> as Factory);
            classes.insert(Role::class_name().to_owned(), instantiate::<Role> as Factory);
            RwLock::new(classes)
        })
    }

    /// Registers `R` under its class name, replacing any earlier registration.
    pub fn register<R: Record>() {
        classes()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(R::class_name().to_owned(), instantiate::<R>);
    }

    /// Returns `true` if a record type is registered for `class_name`.
    pub fn is_registered(class_name: &str) -> bool {
        lookup(class_name).is_some()
    }

    pub(crate) fn lookup(class_name: &str) -> Option<Factory> {
        classes()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class_name)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_class_decodes_to_its_record() {
        let slot = decode::<Object>(&json!({
            "__type": "Pointer",
            "className": "_User",
            "objectId": "u1",
        }))
        .unwrap();

        let user = slot.as_record::<User>().unwrap();
        assert_eq!(user.base.object_id, "u1");
        assert_eq!(slot.class_name(), Some("_User"));
        assert_eq!(slot.to_wire(), json!({"__type": "Pointer", "className": "_User", "objectId": "u1"}));
    }

    #[test]
    fn file_and_unknown_values_fall_through() {
        let file = decode::<Object>(&json!({"__type": "File", "name": "a.txt"})).unwrap();
        assert!(matches!(file, Object::File(ref f) if f.name == "a.txt"));

        let raw = decode::<Object>(&json!({"className": "Unregistered", "x": 1})).unwrap();
        assert!(matches!(raw, Object::Raw(_)));
    }
}
