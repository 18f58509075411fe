//! Conversion between typed values and the store's JSON wire representation.
//!
//! Every type that can appear as a record field implements [`FromWire`] (decoding from a
//! wire value into an existing destination) and [`ToWire`] (encoding for request payloads
//! and query operands). Decoding is destination-directed: the destination's type decides
//! which wire shapes it accepts, and a wire `null` always resets the destination to its
//! zero value.
//!
//! Numeric destinations accept any wire number that converts without loss, so `3.0` decodes
//! into an `i32` but `3.5` or `300` into an `i8` do not.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value, json};
use std::collections::{BTreeMap, HashMap};

use crate::{
    error::{ConvertError, ConvertResult},
    metadata::FieldKind,
};

/// Encodes a value into its wire form.
pub trait ToWire {
    /// Returns the wire representation of this value.
    fn to_wire(&self) -> Value;

    /// Returns `true` when this value is its type's zero value, used by fields marked
    /// `omit_empty`.
    fn is_empty_wire(&self) -> bool {
        false
    }
}

/// Decodes a wire value into an existing destination.
///
/// Implementations only see non-null values; [`decode_into`] handles `null` by resetting
/// the destination to `Default::default()`.
pub trait FromWire: Default {
    /// Decodes `value` into `self`, replacing its current contents.
    ///
    /// # Errors
    ///
    /// Returns a [`ConvertError`] if the wire value's shape does not fit this type.
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()>;

    /// The family of this type, used to validate update operators before they are applied.
    fn kind() -> FieldKind {
        FieldKind::Value
    }
}

/// Decodes `value` into `dst`, treating `null` as the destination type's zero value.
pub fn decode_into<T: FromWire>(dst: &mut T, value: &Value) -> ConvertResult<()> {
    if value.is_null() {
        *dst = T::default();
        Ok(())
    } else {
        dst.decode_from(value)
    }
}

/// Decodes a fresh `T` from `value`.
pub fn decode<T: FromWire>(value: &Value) -> ConvertResult<T> {
    let mut dst = T::default();
    decode_into(&mut dst, value)?;
    Ok(dst)
}

/// Case-normalizes a wire or field name for loose matching: lowercased, underscores removed.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Converts a snake_case identifier into the lowerCamel form used as its default wire name.
pub fn lower_camel(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let mut upper = false;
    for c in ident.trim_start_matches("r#").chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else if out.is_empty() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Encodes a timestamp as a Date object with millisecond precision.
pub fn encode_date(value: &DateTime<Utc>) -> Value {
    json!({
        "__type": "Date",
        "iso": value.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

fn parse_iso(iso: &str) -> ConvertResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| ConvertError::new(format!("invalid timestamp {:?}: {}", iso, err)))
}

/// Returns the value of a number as an `i128` if it is integral.
pub(crate) fn integral(n: &Number) -> Option<i128> {
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(i128::from(u));
    }
    n.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 1e38)
        .map(|f| f as i128)
}

impl<T: ToWire + ?Sized> ToWire for &T {
    fn to_wire(&self) -> Value {
        (**self).to_wire()
    }

    fn is_empty_wire(&self) -> bool {
        (**self).is_empty_wire()
    }
}

impl ToWire for str {
    fn to_wire(&self) -> Value {
        Value::String(self.to_owned())
    }

    fn is_empty_wire(&self) -> bool {
        self.is_empty()
    }
}

impl ToWire for String {
    fn to_wire(&self) -> Value {
        Value::String(self.clone())
    }

    fn is_empty_wire(&self) -> bool {
        self.is_empty()
    }
}

impl FromWire for String {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        match value {
            Value::String(s) => {
                self.clone_from(s);
                Ok(())
            }
            other => Err(ConvertError::mismatch("string", other)),
        }
    }

    fn kind() -> FieldKind {
        FieldKind::String
    }
}

impl ToWire for bool {
    fn to_wire(&self) -> Value {
        Value::Bool(*self)
    }

    fn is_empty_wire(&self) -> bool {
        !*self
    }
}

impl FromWire for bool {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        match value {
            Value::Bool(b) => {
                *self = *b;
                Ok(())
            }
            other => Err(ConvertError::mismatch("boolean", other)),
        }
    }

    fn kind() -> FieldKind {
        FieldKind::Bool
    }
}

macro_rules! impl_integer {
    ($kind:ident => $($ty:ty),*) => {
        $(
            impl ToWire for $ty {
                fn to_wire(&self) -> Value {
                    Value::from(*self)
                }

                fn is_empty_wire(&self) -> bool {
                    *self == 0
                }
            }

            impl FromWire for $ty {
                fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
                    let Value::Number(n) = value else {
                        return Err(ConvertError::mismatch("number", value));
                    };
                    let whole = integral(n).ok_or_else(|| {
                        ConvertError::new(format!("{} is not an integer", n))
                    })?;
                    *self = <$ty>::try_from(whole).map_err(|_| {
                        ConvertError::new(format!("{} overflows {}", n, stringify!($ty)))
                    })?;
                    Ok(())
                }

                fn kind() -> FieldKind {
                    FieldKind::$kind
                }
            }
        )*
    };
}

impl_integer!(Int => i8, i16, i32, i64, isize);
impl_integer!(Uint => u8, u16, u32, u64, usize);

macro_rules! impl_float {
    ($($ty:ty),*) => {
        $(
            impl ToWire for $ty {
                fn to_wire(&self) -> Value {
                    Number::from_f64(f64::from(*self))
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }

                fn is_empty_wire(&self) -> bool {
                    *self == 0.0
                }
            }

            impl FromWire for $ty {
                fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
                    match value.as_f64() {
                        Some(f) => {
                            *self = f as $ty;
                            Ok(())
                        }
                        None => Err(ConvertError::mismatch("number", value)),
                    }
                }

                fn kind() -> FieldKind {
                    FieldKind::Float
                }
            }
        )*
    };
}

impl_float!(f32, f64);

impl ToWire for DateTime<Utc> {
    fn to_wire(&self) -> Value {
        encode_date(self)
    }

    fn is_empty_wire(&self) -> bool {
        *self == DateTime::<Utc>::default()
    }
}

impl FromWire for DateTime<Utc> {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        *self = match value {
            Value::String(iso) => parse_iso(iso)?,
            Value::Object(map) => match (map.get("__type"), map.get("iso")) {
                (Some(Value::String(ty)), Some(Value::String(iso))) if ty == "Date" => {
                    parse_iso(iso)?
                }
                _ => return Err(ConvertError::new("malformed Date object")),
            },
            other => return Err(ConvertError::mismatch("timestamp", other)),
        };
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::Timestamp
    }
}

impl<T: ToWire> ToWire for Option<T> {
    fn to_wire(&self) -> Value {
        match self {
            Some(inner) => inner.to_wire(),
            None => Value::Null,
        }
    }

    fn is_empty_wire(&self) -> bool {
        self.is_none()
    }
}

impl<T: FromWire> FromWire for Option<T> {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        if value.is_null() {
            *self = None;
            return Ok(());
        }
        let inner = self.get_or_insert_with(T::default);
        inner.decode_from(value)
    }

    fn kind() -> FieldKind {
        T::kind()
    }
}

impl<T: ToWire + ?Sized> ToWire for Box<T> {
    fn to_wire(&self) -> Value {
        (**self).to_wire()
    }

    fn is_empty_wire(&self) -> bool {
        (**self).is_empty_wire()
    }
}

impl<T: FromWire> FromWire for Box<T> {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        (**self).decode_from(value)
    }

    fn kind() -> FieldKind {
        T::kind()
    }
}

impl<T: ToWire> ToWire for [T] {
    fn to_wire(&self) -> Value {
        Value::Array(self.iter().map(ToWire::to_wire).collect())
    }

    fn is_empty_wire(&self) -> bool {
        self.is_empty()
    }
}

impl<T: ToWire, const N: usize> ToWire for [T; N] {
    fn to_wire(&self) -> Value {
        self.as_slice().to_wire()
    }

    fn is_empty_wire(&self) -> bool {
        N == 0
    }
}

impl<T: ToWire> ToWire for Vec<T> {
    fn to_wire(&self) -> Value {
        self.as_slice().to_wire()
    }

    fn is_empty_wire(&self) -> bool {
        self.is_empty()
    }
}

impl<T: FromWire> FromWire for Vec<T> {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        let Value::Array(items) = value else {
            return Err(ConvertError::mismatch("array", value));
        };
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            out.push(decode::<T>(item).map_err(|err| err.at(i.to_string()))?);
        }
        *self = out;
        Ok(())
    }

    fn kind() -> FieldKind {
        FieldKind::List
    }
}

macro_rules! impl_string_map {
    ($($map:ident),*) => {
        $(
            impl<T: ToWire> ToWire for $map<String, T> {
                fn to_wire(&self) -> Value {
                    Value::Object(
                        self.iter()
                            .map(|(k, v)| (k.clone(), v.to_wire()))
                            .collect(),
                    )
                }

                fn is_empty_wire(&self) -> bool {
                    self.is_empty()
                }
            }

            impl<T: FromWire> FromWire for $map<String, T> {
                fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
                    let Value::Object(entries) = value else {
                        return Err(ConvertError::mismatch("object", value));
                    };
                    let mut out = $map::new();
                    for (key, item) in entries {
                        out.insert(key.clone(), decode::<T>(item).map_err(|err| err.at(key.as_str()))?);
                    }
                    *self = out;
                    Ok(())
                }

                fn kind() -> FieldKind {
                    FieldKind::Map
                }
            }
        )*
    };
}

impl_string_map!(HashMap, BTreeMap);

impl ToWire for Map<String, Value> {
    fn to_wire(&self) -> Value {
        Value::Object(self.clone())
    }

    fn is_empty_wire(&self) -> bool {
        self.is_empty()
    }
}

impl FromWire for Map<String, Value> {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        match value {
            Value::Object(map) => {
                self.clone_from(map);
                Ok(())
            }
            other => Err(ConvertError::mismatch("object", other)),
        }
    }

    fn kind() -> FieldKind {
        FieldKind::Map
    }
}

impl ToWire for Value {
    fn to_wire(&self) -> Value {
        self.clone()
    }

    fn is_empty_wire(&self) -> bool {
        self.is_null()
    }
}

impl FromWire for Value {
    fn decode_from(&mut self, value: &Value) -> ConvertResult<()> {
        self.clone_from(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lower_camel_follows_identifier_segments() {
        assert_eq!(lower_camel("name"), "name");
        assert_eq!(lower_camel("object_id"), "objectId");
        assert_eq!(lower_camel("created_at"), "createdAt");
        assert_eq!(lower_camel("r#type"), "type");
        assert_eq!(lower_camel("_private_field"), "privateField");
    }

    #[test]
    fn normalize_ignores_case_and_underscores() {
        assert_eq!(normalize("objectId"), "objectid");
        assert_eq!(normalize("object_id"), "objectid");
        assert_eq!(normalize("ACL"), "acl");
    }

    #[test]
    fn null_resets_to_zero_value() {
        let mut n = 7_i64;
        decode_into(&mut n, &Value::Null).unwrap();
        assert_eq!(n, 0);

        let mut s = Some("x".to_owned());
        decode_into(&mut s, &Value::Null).unwrap();
        assert_eq!(s, None);
    }

    #[test]
    fn integers_accept_integral_numbers_only() {
        assert_eq!(decode::<i32>(&json!(3.0)).unwrap(), 3);
        assert_eq!(decode::<u8>(&json!(255)).unwrap(), 255);
        assert!(decode::<i32>(&json!(3.5)).is_err());
        assert!(decode::<u8>(&json!(256)).is_err());
        assert!(decode::<u32>(&json!(-1)).is_err());
        assert!(decode::<i64>(&json!("3")).is_err());
    }

    #[test]
    fn timestamps_decode_from_both_wire_forms() {
        let expected = Utc.with_ymd_and_hms(2015, 3, 1, 12, 30, 0).unwrap();

        assert_eq!(decode::<DateTime<Utc>>(&json!("2015-03-01T12:30:00.000Z")).unwrap(), expected);
        assert_eq!(
            decode::<DateTime<Utc>>(&json!({"__type": "Date", "iso": "2015-03-01T12:30:00.000Z"}))
                .unwrap(),
            expected
        );
        assert!(decode::<DateTime<Utc>>(&json!({"__type": "Date"})).is_err());
        assert!(decode::<DateTime<Utc>>(&json!(12)).is_err());
    }

    #[test]
    fn timestamps_encode_with_millisecond_precision() {
        let at = Utc.timestamp_millis_opt(1_425_213_000_123).unwrap();

        assert_eq!(at.to_wire(), json!({"__type": "Date", "iso": "2015-03-01T12:30:00.123Z"}));
    }

    #[test]
    fn sequence_errors_carry_the_element_index() {
        let err = decode::<Vec<String>>(&json!(["a", 2])).unwrap_err();
        assert_eq!(err.path(), "1");

        assert!(decode::<Vec<String>>(&json!("a")).is_err());
    }

    #[test]
    fn option_allocates_before_decoding() {
        let decoded = decode::<Option<Vec<i64>>>(&json!([1, 2])).unwrap();
        assert_eq!(decoded, Some(vec![1, 2]));
    }
}
