//! Query construction and execution.
//!
//! A [`Query`] accumulates constraints for one record class and runs them against the
//! service. Builder methods mutate the query in place and return it for chaining:
//!
//! ```ignore
//! use parselayer::prelude::*;
//!
//! let mut query = client.query::<GameScore>();
//! query
//!     .greater_than_or_equal("score", 1000)
//!     .less_than("score", 5000)
//!     .starts_with("playerName", "Sean")
//!     .order_by(["-score"])
//!     .limit(10);
//! let scores = query.find().await?;
//! ```
//!
//! # Constraint API
//!
//! - Equality: `equal_to` stores the literal itself.
//! - Comparison: `not_equal_to`, `greater_than`, `greater_than_or_equal`, `less_than`,
//!   `less_than_or_equal`
//! - Sets: `contained_in`, `not_contained_in`, `contains_all`
//! - Existence: `exists`, `does_not_exist`
//! - Strings: `contains`, `starts_with`, `ends_with`, `matches`
//! - Geo: `within_geo_box`, `near`, `within_miles`, `within_kilometers`, `within_radians`
//! - Sub-queries: `matches_key_in_query`, `does_not_match_key_in_query`, `matches_query`,
//!   `does_not_match_query`
//! - Composition: `or`, `related_to`
//!
//! Operator constraints on the same field merge into one operator object, so two range
//! bounds become `{"$gt": .., "$lt": ..}`; repeating an operator replaces only that
//! operator. An operator constraint replaces an equality literal on the same field.

use serde_json::{Map, Value, json};
use std::{collections::BTreeSet, fmt, marker::PhantomData};
use url::form_urlencoded;

use crate::{
    client::Client,
    error::{ParseError, ParseResult},
    record::Record,
    response::{decode_count, decode_page},
    transport::{Method, Request},
    types::GeoPoint,
    wire::{ToWire, decode},
};

pub(crate) const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// The largest page size the service accepts.
pub const MAX_BATCH_SIZE: u32 = 1000;

/// The page size used by iteration unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Quotes `s` as a regular expression matching it literally.
///
/// The service evaluates PCRE patterns, so the text is wrapped in `\Q...\E`; an `\E`
/// inside the text is closed, emitted escaped, and the quoting reopened.
pub fn quote(s: &str) -> String {
    format!("\\Q{}\\E", s.replace("\\E", "\\E\\\\E\\Q"))
}

/// Distance units of `$nearSphere` constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
    Radians,
}

impl DistanceUnit {
    fn key(self) -> &'static str {
        match self {
            DistanceUnit::Miles => "$maxDistanceInMiles",
            DistanceUnit::Kilometers => "$maxDistanceInKilometers",
            DistanceUnit::Radians => "$maxDistanceInRadians",
        }
    }
}

/// What a request built from the query does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operation<'a> {
    /// Fetch one object by id.
    Get(&'a str),
    /// Search the class.
    Search,
}

/// A query over the records of class `R`.
///
/// Cloning a query copies its constraints; changes to the clone never affect the original.
pub struct Query<R> {
    client: Client,
    constraints: Map<String, Value>,
    order: Vec<String>,
    limit: Option<usize>,
    skip: Option<usize>,
    count: bool,
    include: BTreeSet<String>,
    keys: BTreeSet<String>,
    batch_size: u32,
    use_master_key: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Query<R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            constraints: self.constraints.clone(),
            order: self.order.clone(),
            limit: self.limit,
            skip: self.skip,
            count: self.count,
            include: self.include.clone(),
            keys: self.keys.clone(),
            batch_size: self.batch_size,
            use_master_key: self.use_master_key,
            _record: PhantomData,
        }
    }
}

impl<R: Record> fmt::Debug for Query<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("class", &R::class_name())
            .field("where", &self.constraints)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("count", &self.count)
            .field("include", &self.include)
            .field("keys", &self.keys)
            .field("batch_size", &self.batch_size)
            .field("use_master_key", &self.use_master_key)
            .finish()
    }
}

impl<R: Record> Query<R> {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            constraints: Map::new(),
            order: Vec::new(),
            limit: None,
            skip: None,
            count: false,
            include: BTreeSet::new(),
            keys: BTreeSet::new(),
            batch_size: 0,
            use_master_key: false,
            _record: PhantomData,
        }
    }

    /// Returns a new, empty query over the same class and client, typically used to build
    /// the branches of [`or`](Self::or).
    pub fn sub(&self) -> Self {
        Self::new(self.client.clone())
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Returns the constraint map that is sent as the `where` parameter.
    pub fn constraints(&self) -> &Map<String, Value> {
        &self.constraints
    }

    /// Authenticates the query's requests with the master key.
    pub fn use_master_key(&mut self) -> &mut Self {
        self.use_master_key = true;
        self
    }

    /// Sorts results by the given fields. A `-` prefix sorts a field descending.
    pub fn order_by<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(&mut self, skip: usize) -> &mut Self {
        self.skip = Some(skip);
        self
    }

    /// Asks the service to embed the objects referenced by these pointer fields.
    pub fn include<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Restricts the returned fields to these keys.
    pub fn keys<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Sets the page size used by [`each`](Self::each).
    ///
    /// Sizes above [`MAX_BATCH_SIZE`] fall back to [`DEFAULT_BATCH_SIZE`], as does `0`.
    pub fn set_batch_size(&mut self, size: u32) -> &mut Self {
        self.batch_size = if size <= MAX_BATCH_SIZE { size } else { DEFAULT_BATCH_SIZE };
        self
    }

    /// Returns the page size iteration will use.
    pub fn batch_size(&self) -> u32 {
        if self.batch_size == 0 { DEFAULT_BATCH_SIZE } else { self.batch_size }
    }

    pub(crate) fn has_window(&self) -> bool {
        self.limit.is_some() || self.skip.is_some() || !self.order.is_empty()
    }

    pub(crate) fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    /// Stores an operator under `field`, merging with the operators already there.
    fn operator(&mut self, field: &str, op: &str, value: Value) -> &mut Self {
        if let Some(Value::Object(ops)) = self.constraints.get_mut(field) {
            if is_operator_object(ops) {
                ops.insert(op.to_owned(), value);
                return self;
            }
        }
        let mut ops = Map::new();
        ops.insert(op.to_owned(), value);
        self.constraints.insert(field.to_owned(), Value::Object(ops));
        self
    }

    /// Matches records whose `field` equals `value`.
    pub fn equal_to(&mut self, field: &str, value: impl ToWire) -> &mut Self {
        self.constraints.insert(field.to_owned(), value.to_wire());
        self
    }

    pub fn not_equal_to(&mut self, field: &str, value: impl ToWire) -> &mut Self {
        self.operator(field, "$ne", value.to_wire())
    }

    pub fn greater_than(&mut self, field: &str, value: impl ToWire) -> &mut Self {
        self.operator(field, "$gt", value.to_wire())
    }

    pub fn greater_than_or_equal(&mut self, field: &str, value: impl ToWire) -> &mut Self {
        self.operator(field, "$gte", value.to_wire())
    }

    pub fn less_than(&mut self, field: &str, value: impl ToWire) -> &mut Self {
        self.operator(field, "$lt", value.to_wire())
    }

    pub fn less_than_or_equal(&mut self, field: &str, value: impl ToWire) -> &mut Self {
        self.operator(field, "$lte", value.to_wire())
    }

    /// Matches records whose `field` is one of `values`.
    pub fn contained_in<I>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: ToWire,
    {
        self.operator(field, "$in", wire_list(values))
    }

    pub fn not_contained_in<I>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: ToWire,
    {
        self.operator(field, "$nin", wire_list(values))
    }

    /// Matches records whose array `field` contains every one of `values`.
    pub fn contains_all<I>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: ToWire,
    {
        self.operator(field, "$all", wire_list(values))
    }

    pub fn exists(&mut self, field: &str) -> &mut Self {
        self.operator(field, "$exists", Value::Bool(true))
    }

    pub fn does_not_exist(&mut self, field: &str) -> &mut Self {
        self.operator(field, "$exists", Value::Bool(false))
    }

    /// Matches records whose string `field` contains `substring`.
    pub fn contains(&mut self, field: &str, substring: &str) -> &mut Self {
        self.operator(field, "$regex", Value::String(quote(substring)))
    }

    pub fn starts_with(&mut self, field: &str, prefix: &str) -> &mut Self {
        self.operator(field, "$regex", Value::String(format!("^{}", quote(prefix))))
    }

    pub fn ends_with(&mut self, field: &str, suffix: &str) -> &mut Self {
        self.operator(field, "$regex", Value::String(format!("{}$", quote(suffix))))
    }

    /// Matches records whose string `field` contains `text`, optionally ignoring case and
    /// matching across lines.
    pub fn matches(&mut self, field: &str, text: &str, ignore_case: bool, multi_line: bool) -> &mut Self {
        self.operator(field, "$regex", Value::String(quote(text)));

        let mut options = String::new();
        if ignore_case {
            options.push('i');
        }
        if multi_line {
            options.push('m');
        }
        if options.is_empty() {
            if let Some(Value::Object(ops)) = self.constraints.get_mut(field) {
                ops.remove("$options");
            }
            self
        } else {
            self.operator(field, "$options", Value::String(options))
        }
    }

    /// Matches records whose GeoPoint `field` lies within the box spanned by the south-west
    /// and north-east corners.
    pub fn within_geo_box(&mut self, field: &str, south_west: GeoPoint, north_east: GeoPoint) -> &mut Self {
        self.operator(
            field,
            "$within",
            json!({"$box": [south_west.to_wire(), north_east.to_wire()]}),
        )
    }

    /// Orders results by distance of `field` from `point`, nearest first.
    pub fn near(&mut self, field: &str, point: GeoPoint) -> &mut Self {
        self.operator(field, "$nearSphere", point.to_wire())
    }

    /// Matches records whose GeoPoint `field` is within `distance` of `point`.
    pub fn within(&mut self, field: &str, point: GeoPoint, distance: f64, unit: DistanceUnit) -> &mut Self {
        self.near(field, point);
        self.operator(field, unit.key(), distance.to_wire())
    }

    pub fn within_miles(&mut self, field: &str, point: GeoPoint, miles: f64) -> &mut Self {
        self.within(field, point, miles, DistanceUnit::Miles)
    }

    pub fn within_kilometers(&mut self, field: &str, point: GeoPoint, kilometers: f64) -> &mut Self {
        self.within(field, point, kilometers, DistanceUnit::Kilometers)
    }

    pub fn within_radians(&mut self, field: &str, point: GeoPoint, radians: f64) -> &mut Self {
        self.within(field, point, radians, DistanceUnit::Radians)
    }

    /// Matches records whose `field` equals the `key` of some record matched by `query`.
    pub fn matches_key_in_query<S: Record>(&mut self, field: &str, key: &str, query: &Query<S>) -> &mut Self {
        self.operator(field, "$select", json!({"key": key, "query": query.document()}))
    }

    pub fn does_not_match_key_in_query<S: Record>(
        &mut self,
        field: &str,
        key: &str,
        query: &Query<S>,
    ) -> &mut Self {
        self.operator(field, "$dontSelect", json!({"key": key, "query": query.document()}))
    }

    /// Matches records whose pointer `field` references a record matched by `query`.
    pub fn matches_query<S: Record>(&mut self, field: &str, query: &Query<S>) -> &mut Self {
        self.operator(field, "$inQuery", query.document())
    }

    pub fn does_not_match_query<S: Record>(&mut self, field: &str, query: &Query<S>) -> &mut Self {
        self.operator(field, "$notInQuery", query.document())
    }

    /// Replaces every constraint of this query with the disjunction of the constraints of
    /// `queries`.
    ///
    /// Constraints added before the call are discarded, not combined with the disjunction.
    pub fn or<'q, I>(&mut self, queries: I) -> &mut Self
    where
        I: IntoIterator<Item = &'q Query<R>>,
        R: 'q,
    {
        let branches = queries
            .into_iter()
            .map(|query| Value::Object(query.constraints.clone()))
            .collect();
        self.constraints = Map::new();
        self.constraints.insert("$or".to_owned(), Value::Array(branches));
        self
    }

    /// Matches records that are members of the relation `field` of `parent`.
    pub fn related_to(&mut self, field: &str, parent: impl ToWire) -> &mut Self {
        self.constraints.insert(
            "$relatedTo".to_owned(),
            json!({"object": parent.to_wire(), "key": field}),
        );
        self
    }

    /// The query as embedded in another query's `$inQuery`/`$select` constraints.
    pub fn document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("className".to_owned(), Value::String(R::class_name().to_owned()));
        if !self.constraints.is_empty() {
            doc.insert("where".to_owned(), Value::Object(self.constraints.clone()));
        }
        if let Some(limit) = self.limit {
            doc.insert("limit".to_owned(), Value::from(limit));
        }
        if let Some(skip) = self.skip {
            doc.insert("skip".to_owned(), Value::from(skip));
        }
        if !self.order.is_empty() {
            doc.insert("order".to_owned(), Value::String(self.order.join(",")));
        }
        if !self.include.is_empty() {
            doc.insert("include".to_owned(), Value::String(join(&self.include)));
        }
        if !self.keys.is_empty() {
            doc.insert("keys".to_owned(), Value::String(join(&self.keys)));
        }
        Value::Object(doc)
    }

    /// Encodes the query as a URL query string.
    pub fn payload(&self) -> String {
        let mut out = form_urlencoded::Serializer::new(String::new());
        if self.count {
            out.append_pair("count", "1");
        }
        if !self.include.is_empty() {
            out.append_pair("include", &join(&self.include));
        }
        if !self.keys.is_empty() {
            out.append_pair("keys", &join(&self.keys));
        }
        if let Some(limit) = self.limit {
            out.append_pair("limit", &limit.to_string());
        }
        if !self.order.is_empty() {
            out.append_pair("order", &self.order.join(","));
        }
        if let Some(skip) = self.skip {
            out.append_pair("skip", &skip.to_string());
        }
        if !self.constraints.is_empty() {
            out.append_pair("where", &Value::Object(self.constraints.clone()).to_string());
        }
        out.finish()
    }

    pub(crate) fn request(&self, op: Operation<'_>) -> Request {
        let path = match op {
            Operation::Get(id) => format!("{}/{}", R::endpoint(), id),
            Operation::Search => R::endpoint(),
        };
        let payload = self.payload();
        let endpoint = if payload.is_empty() { path } else { format!("{}?{}", path, payload) };

        let mut request = Request::new(Method::Get, endpoint).with_master_key(self.use_master_key);
        request.content_type = CONTENT_TYPE_FORM;
        request
    }

    /// Fetches one page of results. An empty page is not an error here.
    pub(crate) async fn fetch_page(&self) -> ParseResult<Vec<R>> {
        let body = self.client.perform(self.request(Operation::Search)).await?;
        decode_page::<R>(&body)
    }

    /// Fetches the record with object id `id`. Only `include` and `keys` apply.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidArgument`] for an empty id, and the service error when
    /// no such object exists.
    pub async fn get(&self, id: &str) -> ParseResult<R> {
        if id.is_empty() {
            return Err(ParseError::InvalidArgument("object id must not be empty".to_owned()));
        }
        let mut lookup = self.sub();
        lookup.include = self.include.clone();
        lookup.keys = self.keys.clone();
        lookup.use_master_key = self.use_master_key;

        let body = self.client.perform(lookup.request(Operation::Get(id))).await?;
        let value: Value = serde_json::from_slice(&body)?;
        Ok(decode::<R>(&value)?)
    }

    /// Runs the query and returns every matching record.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::NoRows`] if nothing matched.
    pub async fn find(&self) -> ParseResult<Vec<R>> {
        let page = self.fetch_page().await?;
        if page.is_empty() {
            return Err(ParseError::NoRows);
        }
        Ok(page)
    }

    /// Returns the first matching record.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::NoRows`] if nothing matched.
    pub async fn first(&self) -> ParseResult<R> {
        let mut first = self.clone();
        first.limit = Some(1);
        first.fetch_page().await?.into_iter().next().ok_or(ParseError::NoRows)
    }

    /// Counts the matching records without fetching them.
    pub async fn count(&self) -> ParseResult<i64> {
        let mut counting = self.clone();
        counting.limit = Some(0);
        counting.count = true;
        let body = self.client.perform(counting.request(Operation::Search)).await?;
        decode_count(&body)
    }
}

fn is_operator_object(ops: &Map<String, Value>) -> bool {
    !ops.is_empty() && ops.keys().all(|key| key.starts_with('$'))
}

fn wire_list<I>(values: I) -> Value
where
    I: IntoIterator,
    I::Item: ToWire,
{
    Value::Array(values.into_iter().map(|v| v.to_wire()).collect())
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
