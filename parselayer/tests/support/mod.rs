//! Shared fixtures: a transport that replays canned responses and the record types the
//! tests work with.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parselayer::prelude::*;
use serde_json::{Map, Value, json};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

/// A transport that answers requests with queued responses, in order, and records every
/// request it receives.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<ParseResult<Value>>,
    requests: Vec<Request>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response body.
    pub fn respond(&self, body: Value) -> &Self {
        self.script.lock().unwrap().responses.push_back(Ok(body));
        self
    }

    /// Queues a failure.
    pub fn fail(&self, err: ParseError) -> &Self {
        self.script.lock().unwrap().responses.push_back(Err(err));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn client(&self) -> Client {
        Client::new(self.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn perform(&self, request: Request) -> ParseResult<Vec<u8>> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(request);
        match script.responses.pop_front() {
            Some(Ok(body)) => Ok(serde_json::to_vec(&body)?),
            Some(Err(err)) => Err(err),
            None => Err(ParseError::Transport("no scripted response left".to_owned())),
        }
    }
}

/// Decodes the query string of a request into its parameters.
pub fn params(request: &Request) -> HashMap<String, String> {
    url::form_urlencoded::parse(request.query().unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

/// Decodes the `where` parameter of a search request.
pub fn where_of(request: &Request) -> Value {
    params(request)
        .get("where")
        .map(|raw| serde_json::from_str(raw).unwrap())
        .unwrap_or(Value::Null)
}

pub fn body_of(request: &Request) -> Value {
    serde_json::from_slice(request.body.as_deref().unwrap()).unwrap()
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct GameScore {
    #[parse(flatten)]
    pub base: Base,
    pub player_name: String,
    pub score: i64,
    pub ratio: f64,
    #[parse(rename = "cheatMode", omit_empty)]
    pub cheating: bool,
    pub skills: Vec<String>,
    pub played_at: Option<DateTime<Utc>>,
}

impl GameScore {
    pub fn saved(id: &str, score: i64) -> Self {
        Self {
            base: Base { object_id: id.to_owned(), ..Default::default() },
            score,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Record)]
#[parse(class = "Post")]
pub struct Post {
    #[parse(flatten)]
    pub base: Base,
    pub title: String,
    pub author: Option<User>,
    pub attachment: Object,
    #[parse(extra)]
    pub extra: Map<String, Value>,
}

/// A page of search results holding one GameScore per id.
pub fn page(ids: &[String]) -> Value {
    let results: Vec<Value> = ids
        .iter()
        .map(|id| json!({"objectId": id, "score": 1}))
        .collect();
    json!({"results": results})
}

/// `n` ascending object ids.
pub fn ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("id{:05}", i)).collect()
}
