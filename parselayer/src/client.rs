//! The entry point of the data-access layer.
//!
//! A [`Client`] wraps a shared [`Transport`] and the caller's credential. It hands out
//! [`Query`] and [`Update`] builders and performs the simple object operations directly.
//!
//! # Example
//!
//! ```ignore
//! use parselayer::prelude::*;
//!
//! let client = Client::new(transport);
//! let mut post = Post { title: "hello".into(), ..Default::default() };
//! client.create(&mut post, false).await?;
//!
//! let mut query = client.query::<Post>();
//! query.equal_to("title", "hello");
//! let found = query.first().await?;
//! ```

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    error::{ParseError, ParseResult},
    query::Query,
    record::{Record, encode_payload},
    response::merge_object,
    transport::{Method, Request, Transport},
    update::Update,
    wire::{FromWire, decode},
};

/// A handle to the object store.
///
/// Cloning is cheap; clones share the transport.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    session_token: Option<Arc<str>>,
}

impl Client {
    /// Creates a client performing its requests through `transport`.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    /// Creates a client over an already shared transport.
    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self { transport, session_token: None }
    }

    /// Returns a view of this client acting on behalf of the user owning `session_token`.
    ///
    /// Every request issued through the view carries the token.
    pub fn as_user(&self, session_token: impl Into<String>) -> Self {
        let token: String = session_token.into();
        Self {
            transport: Arc::clone(&self.transport),
            session_token: (!token.is_empty()).then(|| Arc::from(token)),
        }
    }

    /// Returns the session token of the user this client acts for.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Starts a query over the class of `R`.
    pub fn query<R: Record>(&self) -> Query<R> {
        Query::new(self.clone())
    }

    /// Starts an update of `record`. The record must have been saved before.
    pub fn update<'a, R: Record>(&self, record: &'a mut R) -> Update<'a, R> {
        Update::new(self.clone(), record)
    }

    /// Saves a new record.
    ///
    /// The object id and creation time assigned by the service are written back into
    /// `record`.
    ///
    /// # Errors
    ///
    /// Returns the service error if the object could not be created.
    #[instrument(skip(self, record), fields(class = R::class_name()))]
    pub async fn create<R: Record>(&self, record: &mut R, use_master_key: bool) -> ParseResult<()> {
        let body = serde_json::to_vec(&Value::Object(encode_payload(record)))?;
        let request = Request::new(Method::Post, R::endpoint())
            .with_json(body)
            .with_master_key(use_master_key);

        let response = self.perform(request).await?;
        merge_object(&response, record)?;
        debug!(object_id = record.object_id().unwrap_or_default(), "Created object");
        Ok(())
    }

    /// Deletes a saved record.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidArgument`] without contacting the service if the record
    /// has no object id.
    #[instrument(skip(self, record), fields(class = R::class_name()))]
    pub async fn delete<R: Record>(&self, record: &R, use_master_key: bool) -> ParseResult<()> {
        let id = require_id(record)?;
        let request = Request::new(Method::Delete, format!("{}/{}", R::endpoint(), id))
            .with_master_key(use_master_key);

        self.perform(request).await?;
        debug!(object_id = id, "Deleted object");
        Ok(())
    }

    /// Calls a cloud function and decodes its `result`.
    ///
    /// # Errors
    ///
    /// Returns the service error reported by the function, or a conversion error if its
    /// result doesn't fit `T`.
    #[instrument(skip(self, params))]
    pub async fn call_function<T: FromWire>(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> ParseResult<T> {
        let body = serde_json::to_vec(&Value::Object(params))?;
        let request = Request::new(Method::Post, format!("functions/{}", name)).with_json(body);

        let response = self.perform(request).await?;
        let mut envelope: Map<String, Value> = serde_json::from_slice(&response)?;
        let result = envelope.remove("result").unwrap_or(Value::Null);
        Ok(decode::<T>(&result).map_err(|err| err.at("result"))?)
    }

    /// Sends a request, attaching the client's session token unless the request already
    /// carries one.
    pub(crate) async fn perform(&self, mut request: Request) -> ParseResult<Vec<u8>> {
        if request.session_token.is_none() {
            request.session_token = self.session_token.as_deref().map(str::to_owned);
        }
        debug!(
            method = %request.method,
            endpoint = %request.endpoint,
            master = request.use_master_key,
            "Performing request",
        );
        self.transport.perform(request).await
    }
}

/// Returns the object id of a saved record.
pub(crate) fn require_id<R: Record>(record: &R) -> ParseResult<&str> {
    match record.object_id() {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ParseError::InvalidArgument(format!(
            "{} has no object id",
            R::class_name()
        ))),
    }
}
