//! In-memory transport for parselayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Transport` trait.
//! It answers the object store's REST endpoints from objects held behind async-aware
//! read-write locks and is meant for development and testing without a server.
//!
//! # Features
//!
//! - **Class endpoints** - Searches, reads, creates, updates and deletes, including the
//!   `users` and `roles` shortcuts
//! - **Constraint evaluation** - Comparison, set, existence, literal regex, `$or`,
//!   sub-query and relation constraints
//! - **Update operators** - `Increment`, `Delete`, `Add`, `AddUnique` and `Remove`
//! - **Cloud functions** - Closures registered by name
//! - **Inspection** - A log of every request and per-request failure injection
//!
//! # Quick Start
//!
//! ```ignore
//! use parselayer::prelude::*;
//! use parselayer_memory::MemoryTransport;
//!
//! #[derive(Debug, Clone, Default, Record)]
//! pub struct Post {
//!     #[parse(flatten)]
//!     pub base: Base,
//!     pub title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ParseError> {
//!     let client = Client::new(MemoryTransport::new());
//!
//!     let mut post = Post { title: "Hello".to_owned(), ..Default::default() };
//!     client.create(&mut post, false).await?;
//!
//!     let found = client.query::<Post>().get(&post.base.object_id).await?;
//!     assert_eq!(found.title, "Hello");
//!     Ok(())
//! }
//! ```

mod evaluator;
pub mod store;

pub use store::{CloudFunction, MemoryTransport, MemoryTransportBuilder};
