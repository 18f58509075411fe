//! Static field descriptors and the per-shape wire name resolver.
//!
//! Every derived record shape carries a [`Shape`]: a static table describing its fields,
//! built at compile time by `#[derive(Record)]`/`#[derive(Fields)]`. The resolver turns a
//! shape into a map of wire name to field identifier for the fields whose wire name can't
//! be derived from the identifier, flattening embedded shapes into their parent. The map is
//! computed once per shape and shared for the rest of the process.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use crate::wire::{lower_camel, normalize};

/// The value family of a field, used to validate update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    /// Signed integers.
    Int,
    /// Unsigned integers.
    Uint,
    /// Floating point numbers.
    Float,
    String,
    Timestamp,
    List,
    Map,
    /// A nested record or field set.
    Record,
    /// A polymorphic slot resolved at decode time.
    Object,
    /// Any wire value, kept verbatim.
    Value,
}

impl FieldKind {
    /// Returns `true` for the three numeric families.
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Int | FieldKind::Uint | FieldKind::Float)
    }
}

/// Describes one externally visible field of a shape.
#[derive(Debug)]
pub struct FieldDescriptor {
    /// The Rust identifier of the field.
    pub ident: &'static str,
    /// The wire name: the `rename` attribute, or the lowerCamel form of the identifier.
    pub wire_name: &'static str,
    /// Set when the wire name differs from the identifier's default wire name. A renamed
    /// field is only ever matched through its wire name.
    pub renamed: bool,
    pub kind: fn() -> FieldKind,
    pub omit_empty: bool,
    /// Never written to outgoing payloads.
    pub skip: bool,
    /// For embedded fields, the shape whose fields are flattened into the parent.
    pub embedded: Option<fn() -> &'static Shape>,
}

/// The static description of a record shape.
#[derive(Debug)]
pub struct Shape {
    pub name: &'static str,
    pub fields: &'static [FieldDescriptor],
}

/// A field lookup key.
///
/// Wire names found in the shape's resolved map address a field by identifier; everything
/// else falls back to the normalized wire name, compared against normalized identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKey<'a> {
    Ident(&'a str),
    Wire(&'a str),
}

impl FieldKey<'_> {
    /// Returns `true` if this key addresses the field described by the arguments.
    ///
    /// `normalized` is the normalized identifier of the field.
    pub fn matches(&self, ident: &str, normalized: &str, renamed: bool) -> bool {
        match self {
            FieldKey::Ident(i) => *i == ident,
            FieldKey::Wire(w) => !renamed && *w == normalized,
        }
    }
}

/// Wire name to field identifier, for fields whose wire name is not the default.
pub type FieldMap = HashMap<&'static str, &'static str>;

impl Shape {
    /// Returns the resolved wire name map for this shape.
    pub fn field_map(&'static self) -> Arc<FieldMap> {
        resolve(self)
    }

    /// Finds the descriptor addressed by `key`, searching the shape's own fields before
    /// the fields of its embedded shapes.
    pub fn find(&'static self, key: &FieldKey<'_>) -> Option<&'static FieldDescriptor> {
        let own = self.fields.iter().filter(|f| f.embedded.is_none()).find(|f| {
            key.matches(f.ident, &normalize(f.ident), f.renamed)
        });
        own.or_else(|| {
            self.fields
                .iter()
                .filter_map(|f| f.embedded)
                .find_map(|embedded| embedded().find(key))
        })
    }
}

/// Builds the lookup key for a caller- or server-supplied wire name.
///
/// `normalized` must be `normalize(wire)`; it is taken separately so the caller owns it.
pub fn key_for<'a>(map: &FieldMap, wire: &str, normalized: &'a str) -> FieldKey<'a> {
    match map.get(wire) {
        Some(ident) => FieldKey::Ident(*ident),
        None => FieldKey::Wire(normalized),
    }
}

fn cache() -> &'static RwLock<HashMap<usize, Arc<FieldMap>>> {
    static CACHE: OnceLock<RwLock<HashMap<usize, Arc<FieldMap>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the wire name map of `shape`, computing and caching it on first use.
///
/// Two callers racing on the first resolution may both compute the map; the first one
/// stored wins and both observe the same entry afterwards.
pub fn resolve(shape: &'static Shape) -> Arc<FieldMap> {
    let id = shape as *const Shape as usize;
    if let Ok(cache) = cache().read() {
        if let Some(map) = cache.get(&id) {
            return Arc::clone(map);
        }
    }

    let computed = Arc::new(compute(shape));
    match cache().write() {
        Ok(mut cache) => Arc::clone(cache.entry(id).or_insert(computed)),
        Err(_) => computed,
    }
}

fn compute(shape: &'static Shape) -> FieldMap {
    let mut map = FieldMap::new();
    for field in shape.fields {
        if let Some(embedded) = field.embedded {
            for (wire, ident) in resolve(embedded()).iter() {
                map.entry(*wire).or_insert(*ident);
            }
            continue;
        }
        let wire = field.wire_name;
        if !wire.is_empty() && wire != "-" && wire != lower_camel(field.ident) {
            map.insert(wire, field.ident);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_kind() -> FieldKind {
        FieldKind::String
    }

    static INNER: Shape = Shape {
        name: "Inner",
        fields: &[FieldDescriptor {
            ident: "acl",
            wire_name: "ACL",
            renamed: true,
            kind: string_kind,
            omit_empty: false,
            skip: false,
            embedded: None,
        }],
    };

    fn inner() -> &'static Shape {
        &INNER
    }

    static OUTER: Shape = Shape {
        name: "Outer",
        fields: &[
            FieldDescriptor {
                ident: "base",
                wire_name: "base",
                renamed: false,
                kind: string_kind,
                omit_empty: false,
                skip: false,
                embedded: Some(inner),
            },
            FieldDescriptor {
                ident: "display_name",
                wire_name: "displayName",
                renamed: false,
                kind: string_kind,
                omit_empty: false,
                skip: false,
                embedded: None,
            },
            FieldDescriptor {
                ident: "title",
                wire_name: "n",
                renamed: true,
                kind: string_kind,
                omit_empty: false,
                skip: false,
                embedded: None,
            },
        ],
    };

    #[test]
    fn map_holds_only_renamed_fields_and_flattens_embedded_shapes() {
        let map = OUTER.field_map();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("n"), Some(&"title"));
        assert_eq!(map.get("ACL"), Some(&"acl"));
    }

    #[test]
    fn resolution_is_memoized_per_shape() {
        let first = resolve(&OUTER);
        let second = resolve(&OUTER);

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn renamed_fields_are_not_reachable_by_identifier() {
        assert!(OUTER.find(&FieldKey::Wire("title")).is_none());
        assert_eq!(OUTER.find(&FieldKey::Ident("title")).map(|f| f.wire_name), Some("n"));
        assert_eq!(OUTER.find(&FieldKey::Wire("displayname")).map(|f| f.ident), Some("display_name"));
        assert_eq!(OUTER.find(&FieldKey::Ident("acl")).map(|f| f.wire_name), Some("ACL"));
    }
}
