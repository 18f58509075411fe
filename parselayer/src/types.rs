//! Special value types with fixed wire encodings.

use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

use crate::{
    error::{ConvertError, ConvertResult},
    metadata::FieldKind,
    record::Record,
    wire::{FromWire, ToWire},
};

const PUBLIC: &str = "*";

fn role_principal(role: &str) -> String {
    format!("role:{}", role)
}

/// An access control list.
///
/// On the wire, an object mapping principal to `{"read": bool, "write": bool}`, where the
/// principal is a user id, `role:<name>`, or `*` for public access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    public_read: bool,
    public_write: bool,
    read: BTreeSet<String>,
    write: BTreeSet<String>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public_read_access(&self) -> bool {
        self.public_read
    }

    pub fn public_write_access(&self) -> bool {
        self.public_write
    }

    /// Returns `true` if the user may read, either explicitly or through public access.
    pub fn read_access(&self, user_id: &str) -> bool {
        self.public_read || self.read.contains(user_id)
    }

    /// Returns `true` if the user may write, either explicitly or through public access.
    pub fn write_access(&self, user_id: &str) -> bool {
        self.public_write || self.write.contains(user_id)
    }

    pub fn role_read_access(&self, role: &str) -> bool {
        self.public_read || self.read.contains(&role_principal(role))
    }

    pub fn role_write_access(&self, role: &str) -> bool {
        self.public_write || self.write.contains(&role_principal(role))
    }

    pub fn set_public_read_access(&mut self, allowed: bool) -> &mut Self {
        self.public_read = allowed;
        self
    }

    pub fn set_public_write_access(&mut self, allowed: bool) -> &mut Self {
        self.public_write = allowed;
        self
    }

    pub fn set_read_access(&mut self, user_id: impl Into<String>, allowed: bool) -> &mut Self {
        toggle(&mut self.read, user_id.into(), allowed);
        self
    }

    pub fn set_write_access(&mut self, user_id: impl Into<String>, allowed: bool) -> &mut Self {
        toggle(&mut self.write, user_id.into(), allowed);
        self
    }

    pub fn set_role_read_access(&mut self, role: &str, allowed: bool) -> &mut Self {
        toggle(&mut self.read, role_principal(role), allowed);
        self
    }

    pub fn set_role_write_access(&mut self, role: &str, allowed: bool) -> &mut Self {
        toggle(&mut self.write, role_principal(role), allowed);
        self
    }
}

fn toggle(set: &mut BTreeSet<String>, principal: String, allowed: bool) {
    if allowed {
        set.insert(principal);
    } else {
        set.remove(&principal);
    }
}

impl ToWire for Acl {
    fn to_wire(&self) -> Value {
        let mut out = Map::new();
        let mut grant = |principal: &str, key: &str| {
            let entry = out
                .entry(principal.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(perms) = entry {
                perms.insert(key.to_owned(), Value::Bool(true));
            }
        };
        if self.public_read {
            grant(PUBLIC, "read");
        }
        if self.public_write {
            grant(PUBLIC, "write");
        }
        for principal in &self.read {
            grant(principal, "read");
        }
        for principal in &self.write {
            grant(principal, "write");
        }
        Value::Object(out)
    }

    fn is_empty_wire(&self) -> bool {
        !self.public_read && !self.public_write && self.read.is_empty() && self.write.is_empty()
    }
}

impl FromWire for Acl {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        let Value::Object(entries) = value else {
            return Err(ConvertError::mismatch("object", value));
        };
        let mut acl = Acl::default();
        for (principal, perms) in entries {
            let Value::Object(perms) = perms else {
                return Err(ConvertError::mismatch("object", perms).at(principal.as_str()));
            };
            let flag = |key: &str| perms.get(key).and_then(Value::as_bool).unwrap_or(false);
            if principal == PUBLIC {
                acl.public_read = flag("read");
                acl.public_write = flag("write");
            } else {
                toggle(&mut acl.read, principal.clone(), flag("read"));
                toggle(&mut acl.write, principal.clone(), flag("write"));
            }
        }
        *self = acl;
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Map
    }
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl ToWire for GeoPoint {
    fn to_wire(&self) -> Value {
        json!({
            "__type": "GeoPoint",
            "latitude": self.latitude,
            "longitude": self.longitude,
        })
    }
}

impl FromWire for GeoPoint {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        let coordinate = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_f64)
                .ok_or_else(|| ConvertError::new("malformed GeoPoint object").at(key))
        };
        *self = GeoPoint::new(coordinate("latitude")?, coordinate("longitude")?);
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Record
    }
}

/// A reference to a file stored by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub url: String,
}

impl File {
    /// Returns `true` if `value` is a File object.
    pub fn is_file(value: &Value) -> bool {
        value.get("__type").and_then(Value::as_str) == Some("File")
    }
}

impl ToWire for File {
    fn to_wire(&self) -> Value {
        let mut out = json!({"__type": "File", "name": self.name});
        if !self.url.is_empty() {
            out["url"] = Value::String(self.url.clone());
        }
        out
    }

    fn is_empty_wire(&self) -> bool {
        self.name.is_empty()
    }
}

impl FromWire for File {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        if !value.is_object() {
            return Err(ConvertError::mismatch("object", value));
        }
        let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default().to_owned();
        *self = File { name: text("name"), url: text("url") };
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Record
    }
}

/// An untyped reference to an object of any class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pointer {
    pub class_name: String,
    pub object_id: String,
}

impl Pointer {
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), object_id: object_id.into() }
    }

    /// Returns a pointer to `record`.
    pub fn to<R: Record>(record: &R) -> Self {
        Self::new(R::class_name(), record.object_id().unwrap_or_default())
    }
}

impl ToWire for Pointer {
    fn to_wire(&self) -> Value {
        json!({
            "__type": "Pointer",
            "className": self.class_name,
            "objectId": self.object_id,
        })
    }

    fn is_empty_wire(&self) -> bool {
        self.object_id.is_empty()
    }
}

impl FromWire for Pointer {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| ConvertError::new("malformed Pointer object").at(key))
        };
        *self = Pointer::new(text("className")?, text("objectId")?);
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode;

    #[test]
    fn acl_round_trips_through_principal_map() {
        let mut acl = Acl::new();
        acl.set_public_read_access(true)
            .set_write_access("user1", true)
            .set_role_read_access("admins", true);

        let wire = acl.to_wire();
        assert_eq!(
            wire,
            json!({
                "*": {"read": true},
                "user1": {"write": true},
                "role:admins": {"read": true},
            })
        );

        let decoded = decode::<Acl>(&wire).unwrap();
        assert_eq!(decoded, acl);
        assert!(decoded.read_access("anyone"));
        assert!(!decoded.write_access("anyone"));
        assert!(decoded.write_access("user1"));
        assert!(decoded.role_read_access("admins"));
    }

    #[test]
    fn acl_rejects_non_object_permissions() {
        let err = decode::<Acl>(&json!({"user1": true})).unwrap_err();
        assert_eq!(err.path(), "user1");
    }

    #[test]
    fn pointer_requires_class_and_id() {
        let ptr = decode::<Pointer>(&json!({"__type": "Pointer", "className": "Post", "objectId": "a1"}))
            .unwrap();
        assert_eq!(ptr, Pointer::new("Post", "a1"));

        assert!(decode::<Pointer>(&json!({"__type": "Pointer", "className": "Post"})).is_err());
    }

    #[test]
    fn file_reads_name_and_url() {
        let file = decode::<File>(&json!({"__type": "File", "name": "a.png", "url": "http://x/a.png"}))
            .unwrap();
        assert_eq!(file.name, "a.png");
        assert_eq!(file.url, "http://x/a.png");
    }
}
