//! Error types and result types for object store operations.
//!
//! Every fallible operation in this crate returns [`ParseResult<T>`]. The variants of
//! [`ParseError`] separate failures reported by the remote service from failures detected
//! locally (bad arguments, values that don't fit the destination type) and from the
//! distinguished "no rows" outcome of a search that matched nothing.

use serde::Deserialize;
use serde_json::{Error as SerdeJsonError, Value};
use std::fmt;
use thiserror::Error;

/// Represents all possible errors that can occur when talking to the object store.
///
/// Errors are cloneable so that a terminal error can be both latched by a
/// [`Cursor`](crate::cursor::Cursor) and delivered on its completion signal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// An error reported by the remote service through its standard error envelope.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The transport failed before a response envelope was available.
    #[error("Transport error: {0}")]
    Transport(String),
    /// An argument could not be used as the target of an operation, e.g. a record without
    /// an object id passed to an update.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The query cannot be executed in the requested way.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A wire value did not match the shape of its destination.
    #[error(transparent)]
    Conversion(#[from] ConvertError),
    /// Serialization/deserialization error when reading or writing JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A search legitimately matched zero records.
    #[error("no results returned")]
    NoRows,
}

/// A specialized `Result` type for object store operations.
pub type ParseResult<T> = Result<T, ParseError>;

impl From<SerdeJsonError> for ParseError {
    fn from(err: SerdeJsonError) -> Self {
        ParseError::Serialization(err.to_string())
    }
}

/// The service's standard error envelope, `{"code": int, "error": string}`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Deserialize)]
#[error("error {code} - {message}")]
pub struct ApiError {
    code: i64,
    #[serde(rename = "error")]
    message: String,
}

impl ApiError {
    pub const INTERNAL_SERVER_ERROR: i64 = 1;
    pub const OBJECT_NOT_FOUND: i64 = 101;
    pub const INVALID_QUERY: i64 = 102;
    pub const INVALID_JSON: i64 = 107;
    pub const SCRIPT_FAILED: i64 = 141;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Parses the error envelope out of a non-success response body.
    ///
    /// A body that isn't a well-formed envelope is reported as a serialization error
    /// rather than being silently mapped to a generic code.
    pub fn from_body(body: &[u8]) -> ParseError {
        match serde_json::from_slice::<ApiError>(body) {
            Ok(err) => ParseError::Api(err),
            Err(err) => ParseError::from(err),
        }
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A wire value could not be converted into its destination type.
///
/// Errors raised deep inside a nested value are re-wrapped on the way out with the name
/// of each enclosing field, so a single error describes the whole path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertError {
    path: Vec<String>,
    message: String,
}

impl ConvertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { path: Vec::new(), message: message.into() }
    }

    /// The destination expected one kind of wire value and found another.
    pub fn mismatch(expected: &str, found: &Value) -> Self {
        Self::new(format!("expected {}, got {}", expected, kind_of(found)))
    }

    /// Prefixes the error path with the name of the enclosing field.
    pub fn at(mut self, field: impl Into<String>) -> Self {
        self.path.insert(0, field.into());
        self
    }

    /// The dotted path of the offending field, empty for a top-level value.
    pub fn path(&self) -> String {
        self.path.join(".")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "Conversion error: {}", self.message)
        } else {
            write!(f, "Conversion error: can not set field {} - {}", self.path(), self.message)
        }
    }
}

impl std::error::Error for ConvertError {}

/// A specialized `Result` type for value conversion.
pub type ConvertResult<T> = Result<T, ConvertError>;

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_error_is_read_from_the_envelope() {
        let err = ApiError::from_body(br#"{"code":101,"error":"object not found for get"}"#);

        assert_eq!(err, ParseError::Api(ApiError::new(101, "object not found for get")));
        assert_eq!(err.to_string(), "error 101 - object not found for get");
    }

    #[test]
    fn malformed_envelope_is_a_serialization_error() {
        assert!(matches!(ApiError::from_body(b"<html>"), ParseError::Serialization(_)));
    }

    #[test]
    fn conversion_error_names_the_field_path() {
        let err = ConvertError::mismatch("string", &json!(3)).at("name").at("author");

        assert_eq!(err.path(), "author.name");
        assert_eq!(
            err.to_string(),
            "Conversion error: can not set field author.name - expected string, got number"
        );
    }
}
