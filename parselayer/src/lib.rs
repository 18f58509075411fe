//! A typed data-access layer for Parse-style JSON/HTTP object stores.
//!
//! This crate is the core of the parselayer project and provides:
//!
//! - **Value conversion** ([`wire`]) - Decoding wire values into typed fields and encoding them back
//! - **Field metadata** ([`metadata`]) - Static field descriptors and the cached wire name resolver
//! - **Records** ([`record`]) - The `Record` and `FieldSet` traits implemented by the derive macros
//! - **Special types** ([`types`], [`object`]) - ACLs, GeoPoints, Files, Pointers and polymorphic slots
//! - **Queries** ([`query`]) - Constraint building and execution
//! - **Iteration** ([`cursor`]) - Cancellable, keyset-paginated streaming over query results
//! - **Updates** ([`update`]) - Update operators applied remotely and to the local record
//! - **Client and transport** ([`client`], [`transport`]) - The request boundary
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use parselayer::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Record)]
//! pub struct Post {
//!     #[parse(flatten)]
//!     pub base: Base,
//!     pub title: String,
//!     pub likes: i64,
//! }
//!
//! let client = Client::new(transport);
//! let mut query = client.query::<Post>();
//! query.greater_than("likes", 10);
//! for post in query.find().await? {
//!     println!("{}", post.title);
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as parselayer;

pub mod builtin;
pub mod client;
pub mod cursor;
pub mod error;
pub mod metadata;
pub mod object;
pub mod prelude;
pub mod query;
pub mod record;
pub mod response;
pub mod transport;
pub mod types;
pub mod update;
pub mod wire;

pub use parselayer_macros::{Fields, Record};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::{Map, Value};
}
