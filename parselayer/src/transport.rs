//! The boundary between the data-access layer and the HTTP client that talks to the service.
//!
//! The layer builds abstract [`Request`]s; a [`Transport`] performs them and returns the raw
//! response body. Signing requests with application keys, compression, rate limiting and
//! retries are the transport's business.

use async_trait::async_trait;
use std::fmt::{self, Debug};

use crate::error::ParseResult;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the service root, including the URL-encoded query string of a
    /// search, e.g. `classes/Post?limit=10`.
    pub endpoint: String,
    /// The JSON body of POST and PUT requests.
    pub body: Option<Vec<u8>>,
    /// Empty when the request has no body.
    pub content_type: &'static str,
    /// Ask the transport to authenticate with the elevated (master) credential.
    pub use_master_key: bool,
    /// The caller's session token, passed through to the service.
    pub session_token: Option<String>,
}

impl Request {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            content_type: "",
            use_master_key: false,
            session_token: None,
        }
    }

    /// Attaches a JSON body.
    pub fn with_json(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self.content_type = CONTENT_TYPE_JSON;
        self
    }

    pub fn with_master_key(mut self, use_master_key: bool) -> Self {
        self.use_master_key = use_master_key;
        self
    }

    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Returns the endpoint path without its query string.
    pub fn path(&self) -> &str {
        self.endpoint
            .split_once('?')
            .map_or(self.endpoint.as_str(), |(path, _)| path)
    }

    /// Returns the URL-encoded query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.endpoint.split_once('?').map(|(_, query)| query)
    }
}

/// Performs requests against the service.
///
/// Implementations return the raw body of a successful response. A non-success response
/// must be reported as [`ParseError::Api`](crate::error::ParseError::Api) carrying the
/// code and message of the service's error envelope (see
/// [`ApiError::from_body`](crate::error::ApiError::from_body)); connection level failures
/// as [`ParseError::Transport`](crate::error::ParseError::Transport).
///
/// Transports are shared read-only between every concurrent operation of a client.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Performs a single request.
    ///
    /// # Errors
    ///
    /// Returns the service error or the transport failure; no retry is attempted by callers.
    async fn perform(&self, request: Request) -> ParseResult<Vec<u8>>;
}
