//! Response envelopes returned by the service.

use serde_json::{Map, Value};

use crate::{
    error::{ConvertError, ParseError, ParseResult},
    record::{FieldSet, decode_fields},
    wire::{FromWire, decode},
};

/// A parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{"count": n}` from a count query.
    Count(i64),
    /// `{"results": [...]}` from a search.
    Results(Vec<Value>),
    /// A bare object from get, create and update.
    Object(Map<String, Value>),
}

impl Envelope {
    /// Parses a response body.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the body is not a JSON object, and a conversion
    /// error if `count` or `results` have the wrong type.
    pub fn parse(body: &[u8]) -> ParseResult<Self> {
        let mut map = match serde_json::from_slice::<Value>(body)? {
            Value::Object(map) => map,
            other => return Err(ConvertError::mismatch("object", &other).into()),
        };
        if let Some(count) = map.remove("count") {
            return Ok(Envelope::Count(decode::<i64>(&count).map_err(|err| err.at("count"))?));
        }
        match map.remove("results") {
            Some(Value::Array(results)) => Ok(Envelope::Results(results)),
            Some(other) => Err(ConvertError::mismatch("array", &other).at("results").into()),
            None => Ok(Envelope::Object(map)),
        }
    }
}

/// Decodes a search page.
///
/// An empty page is returned as an empty vector; callers decide whether that means
/// [`ParseError::NoRows`] or exhaustion.
pub fn decode_page<R: FromWire>(body: &[u8]) -> ParseResult<Vec<R>> {
    match Envelope::parse(body)? {
        Envelope::Results(results) => results
            .iter()
            .enumerate()
            .map(|(i, item)| decode::<R>(item).map_err(|err| ParseError::from(err.at(i.to_string()))))
            .collect(),
        Envelope::Object(_) | Envelope::Count(_) => {
            Err(ParseError::Serialization("expected a results envelope".to_owned()))
        }
    }
}

/// Decodes a bare object response into an existing record, merging the returned fields.
pub fn merge_object<F: FieldSet>(body: &[u8], dst: &mut F) -> ParseResult<()> {
    match Envelope::parse(body)? {
        Envelope::Object(map) => Ok(decode_fields(dst, &Value::Object(map))?),
        Envelope::Results(results) if results.is_empty() => Err(ParseError::NoRows),
        Envelope::Results(_) | Envelope::Count(_) => {
            Err(ParseError::Serialization("expected an object".to_owned()))
        }
    }
}

/// Reads the count of a count query.
pub fn decode_count(body: &[u8]) -> ParseResult<i64> {
    match Envelope::parse(body)? {
        Envelope::Count(count) => Ok(count),
        _ => Err(ParseError::Serialization("expected a count envelope".to_owned())),
    }
}
