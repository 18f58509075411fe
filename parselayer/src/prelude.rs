//! Convenient re-exports of commonly used types from parselayer.
//!
//! ```ignore
//! use parselayer::prelude::*;
//! ```

pub use crate::{
    builtin::{Base, Role, User},
    client::Client,
    cursor::{Canceller, Cursor, RecordStream},
    error::{ApiError, ConvertError, ParseError, ParseResult},
    object::{Object, registry},
    query::{DistanceUnit, Query},
    record::{AnyRecord, FieldSet, Record},
    transport::{Method, Request, Transport},
    types::{Acl, File, GeoPoint, Pointer},
    update::{Update, UpdateOp},
    wire::{FromWire, ToWire},
};
pub use parselayer_macros::{Fields, Record};
