//! In-memory transport implementation for parselayer clients.
//!
//! This module provides a transport that answers requests from objects held in memory,
//! mimicking the object store's REST endpoints closely enough to run clients end to end
//! without a server.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use mea::rwlock::RwLock;
use serde_json::{Map, Value, json};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};
use tracing::{debug, trace};
use url::form_urlencoded;
use uuid::Uuid;

use parselayer::{
    error::{ApiError, ParseError, ParseResult},
    transport::{Method, Request, Transport},
};

use crate::evaluator::{Comparable, ObjectEvaluator};

type Object = Map<String, Value>;
pub(crate) type Classes = HashMap<String, BTreeMap<String, Object>>;

/// A cloud function served by [`MemoryTransport`]: request parameters in, result out.
pub type CloudFunction = Arc<dyn Fn(Map<String, Value>) -> Result<Value, ApiError> + Send + Sync>;

/// The page size the service applies when a search sets no limit.
const DEFAULT_LIMIT: usize = 100;

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_owned()
}

fn not_found(class_name: &str, id: &str) -> ParseError {
    ParseError::Api(ApiError::new(
        ApiError::OBJECT_NOT_FOUND,
        format!("object not found for {}/{}", class_name, id),
    ))
}

fn invalid_json(message: impl Into<String>) -> ParseError {
    ParseError::Api(ApiError::new(ApiError::INVALID_JSON, message))
}

fn class_for(segment: &str) -> Option<&'static str> {
    match segment {
        "users" => Some("_User"),
        "roles" => Some("_Role"),
        "installations" => Some("_Installation"),
        _ => None,
    }
}

/// Thread-safe in-memory object store speaking the service's REST protocol.
///
/// This struct implements the [`Transport`] trait: it routes every [`Request`] to the
/// matching endpoint (class searches, single object reads, creates, updates, deletes and
/// cloud functions) and answers with the same JSON envelopes the service would.
///
/// # Thread Safety
///
/// `MemoryTransport` is cloneable and uses an `Arc`-wrapped internal state, so a clone
/// handed to a [`Client`](parselayer::client::Client) can still be inspected by the test
/// that created it.
///
/// # Example
///
/// ```ignore
/// use parselayer::prelude::*;
/// use parselayer_memory::MemoryTransport;
/// use serde_json::json;
///
/// let transport = MemoryTransport::builder()
///     .object("Post", json!({"objectId": "p1", "title": "Hello"}))
///     .build();
/// let client = Client::new(transport.clone());
///
/// let post = client.query::<Post>().get("p1").await?;
/// assert_eq!(transport.requests().await.len(), 1);
/// ```
#[derive(Default, Clone)]
pub struct MemoryTransport {
    /// class name -> (object id -> object)
    classes: Arc<RwLock<Classes>>,
    functions: Arc<HashMap<String, CloudFunction>>,
    /// Every request performed, in order.
    requests: Arc<RwLock<Vec<Request>>>,
    /// 1-based request number -> error returned instead of handling it.
    failures: Arc<RwLock<BTreeMap<usize, ApiError>>>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Creates an empty transport with no objects and no cloud functions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for seeding objects and cloud functions.
    pub fn builder() -> MemoryTransportBuilder {
        MemoryTransportBuilder::default()
    }

    /// Returns every request performed so far.
    pub async fn requests(&self) -> Vec<Request> {
        self.requests.read().await.clone()
    }

    /// Returns the stored form of an object.
    pub async fn object(&self, class_name: &str, object_id: &str) -> Option<Map<String, Value>> {
        self.classes
            .read()
            .await
            .get(class_name)
            .and_then(|objects| objects.get(object_id))
            .cloned()
    }

    /// Returns the number of stored objects of a class.
    pub async fn len(&self, class_name: &str) -> usize {
        self.classes
            .read()
            .await
            .get(class_name)
            .map_or(0, BTreeMap::len)
    }

    /// Makes the `n`-th request (counting from 1 over the transport's lifetime) fail with
    /// `err`.
    pub async fn fail_request(&self, n: usize, err: ApiError) {
        self.failures.write().await.insert(n, err);
    }

    async fn search(&self, class_name: &str, query: Option<&str>) -> ParseResult<Value> {
        let params: HashMap<String, String> = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let number = |key: &str| -> ParseResult<Option<usize>> {
            params
                .get(key)
                .map(|v| v.parse::<usize>().map_err(|_| invalid_json(format!("invalid {}: {}", key, v))))
                .transpose()
        };
        let list = |key: &str| -> Vec<String> {
            params
                .get(key)
                .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default()
        };

        let constraints = match params.get("where") {
            Some(raw) => match serde_json::from_str(raw)? {
                Value::Object(constraints) => constraints,
                _ => return Err(invalid_json("where must be a JSON object")),
            },
            None => Map::new(),
        };

        let classes = self.classes.read().await;
        let mut matched = ObjectEvaluator::new(&classes, class_name).filter_objects(&constraints)?;

        let order = list("order");
        if !order.is_empty() {
            matched.sort_by(|a, b| compare_by(a, b, &order));
        }

        let total = matched.len();
        let skip = number("skip")?.unwrap_or(0);
        let limit = number("limit")?.unwrap_or(DEFAULT_LIMIT);
        let keys = list("keys");
        let include = list("include");

        let results: Vec<Value> = matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|object| {
                let mut object = project(object, &keys);
                resolve_includes(&classes, &mut object, &include);
                Value::Object(object)
            })
            .collect();
        trace!(class = class_name, matched = total, returned = results.len(), "Search");

        if params.get("count").is_some_and(|c| c == "1") {
            Ok(json!({"count": total, "results": results}))
        } else {
            Ok(json!({"results": results}))
        }
    }

    async fn get(&self, class_name: &str, id: &str, query: Option<&str>) -> ParseResult<Value> {
        let classes = self.classes.read().await;
        let object = classes
            .get(class_name)
            .and_then(|objects| objects.get(id))
            .ok_or_else(|| not_found(class_name, id))?;

        let params: HashMap<String, String> = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let list = |key: &str| -> Vec<String> {
            params
                .get(key)
                .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default()
        };
        let mut object = project(object, &list("keys"));
        resolve_includes(&classes, &mut object, &list("include"));
        Ok(Value::Object(object))
    }

    async fn create(&self, class_name: &str, body: Option<&[u8]>) -> ParseResult<Value> {
        let mut object = parse_body(body)?;
        if let Some(key) = object.keys().find(|k| is_op(object.get(*k))) {
            return Err(invalid_json(format!("cannot apply an operator to new field {}", key)));
        }

        let id = new_object_id();
        let created_at = now();
        object.insert("objectId".to_owned(), Value::String(id.clone()));
        object.insert("createdAt".to_owned(), Value::String(created_at.clone()));
        object.insert("updatedAt".to_owned(), Value::String(created_at.clone()));

        self.classes
            .write()
            .await
            .entry(class_name.to_owned())
            .or_default()
            .insert(id.clone(), object);
        debug!(class = class_name, id = %id, "Created object");

        Ok(json!({"objectId": id, "createdAt": created_at}))
    }

    async fn update(&self, class_name: &str, id: &str, body: Option<&[u8]>) -> ParseResult<Value> {
        let changes = parse_body(body)?;
        let mut classes = self.classes.write().await;
        let object = classes
            .get_mut(class_name)
            .and_then(|objects| objects.get_mut(id))
            .ok_or_else(|| not_found(class_name, id))?;

        // Validate every change before touching the stored object.
        let mut staged = object.clone();
        for (key, change) in changes {
            apply_change(&mut staged, key, change)?;
        }
        let updated_at = now();
        staged.insert("updatedAt".to_owned(), Value::String(updated_at.clone()));
        *object = staged;
        debug!(class = class_name, id = id, "Updated object");

        Ok(json!({"updatedAt": updated_at}))
    }

    async fn delete(&self, class_name: &str, id: &str) -> ParseResult<Value> {
        self.classes
            .write()
            .await
            .get_mut(class_name)
            .and_then(|objects| objects.remove(id))
            .ok_or_else(|| not_found(class_name, id))?;
        debug!(class = class_name, id = id, "Deleted object");
        Ok(json!({}))
    }

    fn call_function(&self, name: &str, body: Option<&[u8]>) -> ParseResult<Value> {
        let function = self.functions.get(name).ok_or_else(|| {
            ParseError::Api(ApiError::new(
                ApiError::SCRIPT_FAILED,
                format!("Invalid function: \"{}\"", name),
            ))
        })?;
        let params = match body {
            Some(_) => parse_body(body)?,
            None => Map::new(),
        };
        let result = function(params)?;
        Ok(json!({"result": result}))
    }

    async fn route(&self, request: &Request) -> ParseResult<Value> {
        let segments: Vec<&str> = request.path().trim_matches('/').split('/').collect();
        let body = request.body.as_deref();
        let query = request.query();

        let (class_name, id) = match segments.as_slice() {
            ["functions", name] if request.method == Method::Post => {
                return self.call_function(name, body);
            }
            ["classes", class] => (*class, None),
            ["classes", class, id] => (*class, Some(*id)),
            [segment] => (class_for(segment).ok_or_else(|| unknown_route(request))?, None),
            [segment, id] => (class_for(segment).ok_or_else(|| unknown_route(request))?, Some(*id)),
            _ => return Err(unknown_route(request)),
        };

        match (request.method, id) {
            (Method::Get, None) => self.search(class_name, query).await,
            (Method::Post, None) => self.create(class_name, body).await,
            (Method::Get, Some(id)) => self.get(class_name, id, query).await,
            (Method::Put, Some(id)) => self.update(class_name, id, body).await,
            (Method::Delete, Some(id)) => self.delete(class_name, id).await,
            _ => Err(unknown_route(request)),
        }
    }
}

fn unknown_route(request: &Request) -> ParseError {
    ParseError::Transport(format!("no route for {} {}", request.method, request.endpoint))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn perform(&self, request: Request) -> ParseResult<Vec<u8>> {
        let number = {
            let mut requests = self.requests.write().await;
            requests.push(request.clone());
            requests.len()
        };
        if let Some(err) = self.failures.write().await.remove(&number) {
            debug!(request = number, error = %err, "Injected failure");
            return Err(ParseError::Api(err));
        }

        let response = self.route(&request).await?;
        Ok(serde_json::to_vec(&response)?)
    }
}

fn parse_body(body: Option<&[u8]>) -> ParseResult<Object> {
    let body = body.ok_or_else(|| invalid_json("request body is missing"))?;
    match serde_json::from_slice(body)? {
        Value::Object(object) => Ok(object),
        _ => Err(invalid_json("request body must be a JSON object")),
    }
}

fn is_op(value: Option<&Value>) -> bool {
    value.and_then(|v| v.get("__op")).is_some()
}

fn compare_by(a: &Object, b: &Object, order: &[String]) -> Ordering {
    for key in order {
        let (key, descending) = match key.strip_prefix('-') {
            Some(key) => (key, true),
            None => (key.as_str(), false),
        };
        let ordering = match (a.get(key), b.get(key)) {
            (Some(x), Some(y)) => Comparable::from(x)
                .partial_cmp(&Comparable::from(y))
                .unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Restricts an object to `keys`; server-managed fields are always returned.
fn project(object: &Object, keys: &[String]) -> Object {
    if keys.is_empty() {
        return object.clone();
    }
    object
        .iter()
        .filter(|(k, _)| {
            matches!(k.as_str(), "objectId" | "createdAt" | "updatedAt") || keys.iter().any(|key| key == *k)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Replaces pointers held by the included fields with the objects they reference.
fn resolve_includes(classes: &Classes, object: &mut Object, include: &[String]) {
    for field in include {
        let field = field.split('.').next().unwrap_or_default();
        match object.get_mut(field) {
            Some(Value::Array(items)) => items.iter_mut().for_each(|item| expand_pointer(classes, item)),
            Some(value) => expand_pointer(classes, value),
            None => {}
        }
    }
}

fn expand_pointer(classes: &Classes, value: &mut Value) {
    if value.get("__type").and_then(Value::as_str) != Some("Pointer") {
        return;
    }
    let (Some(class_name), Some(id)) = (
        value.get("className").and_then(Value::as_str),
        value.get("objectId").and_then(Value::as_str),
    ) else {
        return;
    };
    if let Some(target) = classes.get(class_name).and_then(|objects| objects.get(id)) {
        let mut expanded = target.clone();
        expanded.insert("__type".to_owned(), json!("Object"));
        expanded.insert("className".to_owned(), json!(class_name));
        *value = Value::Object(expanded);
    }
}

fn apply_change(object: &mut Object, key: String, change: Value) -> ParseResult<()> {
    if matches!(key.as_str(), "objectId" | "createdAt" | "updatedAt") {
        return Err(invalid_json(format!("{} cannot be modified", key)));
    }
    let Some(op) = change.get("__op").and_then(Value::as_str).map(str::to_owned) else {
        object.insert(key, change);
        return Ok(());
    };
    let objects = || -> ParseResult<Vec<Value>> {
        match change.get("objects") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(invalid_json(format!("{} on {} expects an objects array", op, key))),
        }
    };
    let current_list = |object: &Object| -> ParseResult<Vec<Value>> {
        match object.get(&key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(invalid_json(format!("{} is not an array", key))),
        }
    };

    let updated = match op.as_str() {
        "Delete" => {
            object.remove(&key);
            return Ok(());
        }
        "Increment" => {
            let amount = change
                .get("amount")
                .filter(|a| a.is_number())
                .ok_or_else(|| invalid_json(format!("Increment on {} expects a numeric amount", key)))?;
            match object.get(&key) {
                None | Some(Value::Null) => amount.clone(),
                Some(Value::Number(current)) => add_numbers(current, amount)
                    .ok_or_else(|| invalid_json(format!("cannot increment {}", key)))?,
                Some(_) => return Err(invalid_json(format!("{} is not a number", key))),
            }
        }
        "Add" => {
            let mut items = current_list(object)?;
            items.extend(objects()?);
            Value::Array(items)
        }
        "AddUnique" => {
            let mut items = current_list(object)?;
            for candidate in objects()? {
                if !items.contains(&candidate) {
                    items.push(candidate);
                }
            }
            Value::Array(items)
        }
        "Remove" => {
            let removed = objects()?;
            let mut items = current_list(object)?;
            items.retain(|item| !removed.contains(item));
            Value::Array(items)
        }
        other => return Err(invalid_json(format!("unknown operator {}", other))),
    };
    object.insert(key, updated);
    Ok(())
}

fn add_numbers(current: &serde_json::Number, amount: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        return a.checked_add(b).map(Value::from);
    }
    let sum = current.as_f64()? + amount.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

/// Builder for [`MemoryTransport`] instances.
///
/// Seeded objects keep the `objectId` they carry, or get a generated one. Missing
/// `createdAt` and `updatedAt` timestamps are filled in with the build time.
#[derive(Default)]
pub struct MemoryTransportBuilder {
    classes: Classes,
    functions: HashMap<String, CloudFunction>,
    failures: BTreeMap<usize, ApiError>,
}

impl MemoryTransportBuilder {
    /// Seeds one object. Values that are not JSON objects are ignored.
    pub fn object(mut self, class_name: impl Into<String>, object: Value) -> Self {
        let Value::Object(mut object) = object else {
            return self;
        };
        let id = match object.get("objectId").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => new_object_id(),
        };
        let timestamp = now();
        object.insert("objectId".to_owned(), Value::String(id.clone()));
        for key in ["createdAt", "updatedAt"] {
            object
                .entry(key)
                .or_insert_with(|| Value::String(timestamp.clone()));
        }
        self.classes
            .entry(class_name.into())
            .or_default()
            .insert(id, object);
        self
    }

    /// Seeds several objects of one class.
    pub fn objects(mut self, class_name: &str, objects: impl IntoIterator<Item = Value>) -> Self {
        for object in objects {
            self = self.object(class_name, object);
        }
        self
    }

    /// Registers a cloud function callable through `functions/<name>`.
    pub fn function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Makes the `n`-th request (counting from 1) fail with `err`.
    pub fn fail_request(mut self, n: usize, err: ApiError) -> Self {
        self.failures.insert(n, err);
        self
    }

    pub fn build(self) -> MemoryTransport {
        MemoryTransport {
            classes: Arc::new(RwLock::new(self.classes)),
            functions: Arc::new(self.functions),
            requests: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(self.failures)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_ten_characters() {
        let id = new_object_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn increments_keep_integers_integral() {
        let mut object = Object::new();
        object.insert("score".to_owned(), json!(5));
        apply_change(&mut object, "score".to_owned(), json!({"__op": "Increment", "amount": 2})).unwrap();
        assert_eq!(object["score"], json!(7));

        apply_change(&mut object, "score".to_owned(), json!({"__op": "Increment", "amount": 0.5})).unwrap();
        assert_eq!(object["score"], json!(7.5));
    }

    #[test]
    fn array_operators() {
        let mut object = Object::new();
        apply_change(&mut object, "tags".to_owned(), json!({"__op": "Add", "objects": ["a", "b"]})).unwrap();
        apply_change(&mut object, "tags".to_owned(), json!({"__op": "AddUnique", "objects": ["b", "c"]})).unwrap();
        apply_change(&mut object, "tags".to_owned(), json!({"__op": "Remove", "objects": ["a"]})).unwrap();
        assert_eq!(object["tags"], json!(["b", "c"]));

        apply_change(&mut object, "tags".to_owned(), json!({"__op": "Delete"})).unwrap();
        assert!(!object.contains_key("tags"));
    }

    #[test]
    fn descending_order_reverses_comparison() {
        let a: Object = serde_json::from_value(json!({"n": 1})).unwrap();
        let b: Object = serde_json::from_value(json!({"n": 2})).unwrap();
        assert_eq!(compare_by(&a, &b, &["n".to_owned()]), Ordering::Less);
        assert_eq!(compare_by(&a, &b, &["-n".to_owned()]), Ordering::Greater);
    }
}
