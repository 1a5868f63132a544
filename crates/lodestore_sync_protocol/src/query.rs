//! Query predicates.
//!
//! A [`Query`] is a JSON filter plus sort, skip and limit. The same value is
//! evaluated in memory against cached documents, sent to the backend as
//! request parameters, and serialized into a canonical key for the query
//! cache.
//!
//! Filters follow the usual document-store shape: a plain value means
//! equality, and an object whose keys all start with `$` is an operator
//! expression (`$in`, `$nin`, `$ne`, `$exists`, `$gt`, `$gte`, `$lt`,
//! `$lte`). Field names may be dotted paths into nested objects.

use crate::error::{ProtocolError, ProtocolResult};
use lodestore_storage::Document;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Sort direction for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

impl SortOrder {
    fn to_code(self) -> i64 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }

    fn from_value(value: &Value) -> ProtocolResult<Self> {
        match value.as_i64() {
            Some(1) => Ok(SortOrder::Ascending),
            Some(-1) => Ok(SortOrder::Descending),
            _ => Err(ProtocolError::InvalidQuery(format!(
                "sort direction must be 1 or -1, got {value}"
            ))),
        }
    }
}

/// A filter with optional sort, skip and limit.
///
/// # Example
///
/// ```rust
/// use lodestore_sync_protocol::Query;
///
/// let query = Query::new().equal_to("genre", "scifi").ascending("title");
/// assert!(query.is_delta_eligible());
/// assert!(query.clone().limit(10).cache_key().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filter: Map<String, Value>,
    sort: Vec<(String, SortOrder)>,
    skip: usize,
    limit: Option<usize>,
}

impl Query {
    /// Creates a query that matches every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query from a raw filter object.
    #[must_use]
    pub fn from_filter(filter: Map<String, Value>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Requires `field` to equal `value`.
    #[must_use]
    pub fn equal_to(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(field.to_string(), value.into());
        self
    }

    /// Requires `field` to be one of `values`.
    #[must_use]
    pub fn contains(self, field: &str, values: Vec<Value>) -> Self {
        self.operator(field, "$in", Value::Array(values))
    }

    /// Requires `field` to differ from `value`.
    #[must_use]
    pub fn not_equal_to(self, field: &str, value: impl Into<Value>) -> Self {
        self.operator(field, "$ne", value.into())
    }

    /// Requires `field` to be present (or absent).
    #[must_use]
    pub fn exists(self, field: &str, present: bool) -> Self {
        self.operator(field, "$exists", Value::Bool(present))
    }

    /// Requires `field` to be greater than `value`.
    #[must_use]
    pub fn greater_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.operator(field, "$gt", value.into())
    }

    /// Requires `field` to be less than `value`.
    #[must_use]
    pub fn less_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.operator(field, "$lt", value.into())
    }

    fn operator(mut self, field: &str, op: &str, value: Value) -> Self {
        let slot = self
            .filter
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !is_operator_object(slot) {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(ops) = slot {
            ops.insert(op.to_string(), value);
        }
        self
    }

    /// Sorts ascending by `field` after any existing sort keys.
    #[must_use]
    pub fn ascending(mut self, field: &str) -> Self {
        self.sort.push((field.to_string(), SortOrder::Ascending));
        self
    }

    /// Sorts descending by `field` after any existing sort keys.
    #[must_use]
    pub fn descending(mut self, field: &str) -> Self {
        self.sort.push((field.to_string(), SortOrder::Descending));
        self
    }

    /// Skips the first `skip` matching documents.
    #[must_use]
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Returns at most `limit` documents.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns a copy restricted to one page of results.
    #[must_use]
    pub fn page(&self, skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit: Some(limit),
            ..self.clone()
        }
    }

    /// Returns the same filter with no sort, skip or limit.
    #[must_use]
    pub fn filter_only(&self) -> Self {
        Self::from_filter(self.filter.clone())
    }

    /// Returns the filter object.
    pub fn filter(&self) -> &Map<String, Value> {
        &self.filter
    }

    /// Returns the skip count.
    pub fn skip_count(&self) -> usize {
        self.skip
    }

    /// Returns the limit, if any.
    pub fn limit_count(&self) -> Option<usize> {
        self.limit
    }

    /// Returns true if the query has no filter, sort, skip or limit.
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.sort.is_empty() && self.skip == 0 && self.limit.is_none()
    }

    /// Returns true if the query may be tracked in the query cache.
    ///
    /// Queries with a skip or limit select a window of the result set and
    /// can't be refreshed from a delta.
    pub fn is_delta_eligible(&self) -> bool {
        self.skip == 0 && self.limit.is_none()
    }

    /// Returns the canonical query cache key.
    ///
    /// `None` for queries that are not delta-eligible, an empty string for
    /// the empty query, and otherwise compact JSON with sorted object keys.
    pub fn cache_key(&self) -> Option<String> {
        if !self.is_delta_eligible() {
            return None;
        }
        if self.filter.is_empty() && self.sort.is_empty() {
            return Some(String::new());
        }
        let sort: Vec<Value> = self
            .sort
            .iter()
            .map(|(field, order)| json!([field, order.to_code()]))
            .collect();
        Some(json!({ "filter": self.filter, "sort": sort }).to_string())
    }

    /// Returns true if the document satisfies the filter.
    pub fn matches(&self, doc: &Document) -> bool {
        self.filter
            .iter()
            .all(|(path, condition)| matches_condition(lookup(doc, path), condition))
    }

    /// Filters, sorts, skips and limits documents.
    pub fn process(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = docs.into_iter().filter(|doc| self.matches(doc)).collect();

        if !self.sort.is_empty() {
            matched.sort_by(|a, b| {
                for (field, order) in &self.sort {
                    let ordering = compare_values(lookup(a, field), lookup(b, field));
                    let ordering = match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        matched.into_iter().skip(self.skip).take(limit).collect()
    }

    /// Encodes the query as request parameters.
    ///
    /// A single sort key is sent as `{"field": 1}`; several keys are sent as
    /// an array of `[field, direction]` pairs to keep their order.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.filter.is_empty() {
            params.push(("query".to_string(), Value::Object(self.filter.clone()).to_string()));
        }
        match self.sort.as_slice() {
            [] => {}
            [(field, order)] => {
                params.push(("sort".to_string(), json!({ field: order.to_code() }).to_string()));
            }
            keys => {
                let pairs: Vec<Value> = keys
                    .iter()
                    .map(|(field, order)| json!([field, order.to_code()]))
                    .collect();
                params.push(("sort".to_string(), Value::Array(pairs).to_string()));
            }
        }
        if self.skip > 0 {
            params.push(("skip".to_string(), self.skip.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Decodes a query from request parameters. Unknown parameters are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidQuery`] for malformed values.
    pub fn from_params<'a, I>(params: I) -> ProtocolResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = Query::new();
        for (name, value) in params {
            match name {
                "query" => match serde_json::from_str::<Value>(value)? {
                    Value::Object(filter) => query.filter = filter,
                    other => {
                        return Err(ProtocolError::InvalidQuery(format!(
                            "query must be an object, got {other}"
                        )))
                    }
                },
                "sort" => query.sort = parse_sort(&serde_json::from_str::<Value>(value)?)?,
                "skip" => query.skip = parse_count(name, value)?,
                "limit" => query.limit = Some(parse_count(name, value)?),
                _ => {}
            }
        }
        Ok(query)
    }
}

fn parse_count(name: &str, value: &str) -> ProtocolResult<usize> {
    value
        .parse()
        .map_err(|_| ProtocolError::InvalidQuery(format!("{name} must be a non-negative integer")))
}

fn parse_sort(value: &Value) -> ProtocolResult<Vec<(String, SortOrder)>> {
    match value {
        Value::Object(fields) => fields
            .iter()
            .map(|(field, order)| Ok((field.clone(), SortOrder::from_value(order)?)))
            .collect(),
        Value::Array(pairs) => pairs
            .iter()
            .map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([Value::String(field), order]) => {
                    Ok((field.clone(), SortOrder::from_value(order)?))
                }
                _ => Err(ProtocolError::InvalidQuery(format!(
                    "sort pair must be [field, direction], got {pair}"
                ))),
            })
            .collect(),
        other => Err(ProtocolError::InvalidQuery(format!(
            "sort must be an object or array, got {other}"
        ))),
    }
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|key| key.starts_with('$')),
        _ => false,
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_condition(field: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if is_operator_object(condition) => ops
            .iter()
            .all(|(op, operand)| matches_operator(field, op, operand)),
        _ => equals(field, condition),
    }
}

fn matches_operator(field: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$in" => operand
            .as_array()
            .is_some_and(|values| values.iter().any(|value| equals(field, value))),
        "$nin" => operand
            .as_array()
            .is_some_and(|values| !values.iter().any(|value| equals(field, value))),
        "$ne" => !equals(field, operand),
        "$exists" => operand.as_bool().unwrap_or(true) == field.is_some(),
        "$gt" => compare_operand(field, operand) == Some(Ordering::Greater),
        "$gte" => matches!(
            compare_operand(field, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$lt" => compare_operand(field, operand) == Some(Ordering::Less),
        "$lte" => matches!(
            compare_operand(field, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        _ => false,
    }
}

/// Equality with array membership: a scalar matches an array containing it.
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(actual) if actual == expected => true,
        Some(Value::Array(items)) => items.contains(expected),
        Some(actual) => numbers_equal(actual, expected),
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => a.is_number() && b.is_number() && x == y,
        _ => false,
    }
}

/// Range comparison only between values of the same kind.
fn compare_operand(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (field?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total order used for sorting: missing < null < bool < number < string < array < object.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ Value::Array(_)), Some(y @ Value::Array(_)))
        | (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn books() -> Vec<Document> {
        vec![
            doc(json!({"_id": "1", "title": "Dune", "year": 1965, "tags": ["scifi"], "meta": {"pages": 412}})),
            doc(json!({"_id": "2", "title": "Emma", "year": 1815, "tags": ["classic"]})),
            doc(json!({"_id": "3", "title": "Solaris", "year": 1961, "tags": ["scifi", "classic"]})),
        ]
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d["_id"].as_str().unwrap()).collect()
    }

    #[test]
    fn empty_query_matches_all() {
        let result = Query::new().process(books());
        assert_eq!(result.len(), 3);
        assert!(Query::new().is_empty());
    }

    #[test]
    fn equality_and_array_membership() {
        let result = Query::new().equal_to("tags", "classic").process(books());
        assert_eq!(ids(&result), vec!["2", "3"]);

        let result = Query::new().equal_to("title", "Dune").process(books());
        assert_eq!(ids(&result), vec!["1"]);
    }

    #[test]
    fn operators() {
        let q = Query::new().greater_than("year", 1900).less_than("year", 1965);
        assert_eq!(ids(&q.process(books())), vec!["3"]);

        let q = Query::new().contains("_id", vec![json!("1"), json!("2")]);
        assert_eq!(ids(&q.process(books())), vec!["1", "2"]);

        let q = Query::new().not_equal_to("title", "Emma");
        assert_eq!(ids(&q.process(books())), vec!["1", "3"]);

        let q = Query::new().exists("meta", true);
        assert_eq!(ids(&q.process(books())), vec!["1"]);

        let q = Query::new().exists("meta", false);
        assert_eq!(ids(&q.process(books())), vec!["2", "3"]);
    }

    #[test]
    fn raw_operators() {
        let q = Query::from_filter(doc(json!({"year": {"$gte": 1961, "$lte": 1965}})));
        assert_eq!(ids(&q.process(books())), vec!["1", "3"]);

        let q = Query::from_filter(doc(json!({"_id": {"$nin": ["1"]}})));
        assert_eq!(ids(&q.process(books())), vec!["2", "3"]);

        let q = Query::from_filter(doc(json!({"year": {"$bogus": 1}})));
        assert!(q.process(books()).is_empty());
    }

    #[test]
    fn dotted_paths() {
        let q = Query::new().equal_to("meta.pages", 412);
        assert_eq!(ids(&q.process(books())), vec!["1"]);
    }

    #[test]
    fn equality_on_nested_object_is_literal() {
        let d = doc(json!({"_id": "x", "meta": {"pages": 1}}));
        let q = Query::new().equal_to("meta", json!({"pages": 1}));
        assert!(q.matches(&d));
    }

    #[test]
    fn sort_skip_limit() {
        let q = Query::new().descending("year");
        assert_eq!(ids(&q.process(books())), vec!["1", "3", "2"]);

        let q = Query::new().ascending("year").skip(1).limit(1);
        assert_eq!(ids(&q.process(books())), vec!["3"]);
    }

    #[test]
    fn sort_puts_missing_first() {
        let docs = vec![doc(json!({"_id": "a", "n": 2})), doc(json!({"_id": "b"}))];
        let q = Query::new().ascending("n");
        assert_eq!(ids(&q.process(docs)), vec!["b", "a"]);
    }

    #[test]
    fn cache_key_rules() {
        assert_eq!(Query::new().cache_key(), Some(String::new()));
        assert_eq!(Query::new().skip(5).cache_key(), None);
        assert_eq!(Query::new().limit(5).cache_key(), None);

        let key = Query::new().equal_to("b", 1).equal_to("a", 2).cache_key().unwrap();
        assert_eq!(key, r#"{"filter":{"a":2,"b":1},"sort":[]}"#);
    }

    #[test]
    fn page_keeps_filter() {
        let base = Query::new().equal_to("a", 1);
        let page = base.page(20, 10);
        assert_eq!(page.filter(), base.filter());
        assert_eq!(page.skip_count(), 20);
        assert_eq!(page.limit_count(), Some(10));
        assert_eq!(page.filter_only(), base);
    }

    #[test]
    fn params_roundtrip() {
        let q = Query::new()
            .equal_to("genre", "scifi")
            .ascending("title")
            .skip(10)
            .limit(5);
        let params = q.to_params();
        let decoded =
            Query::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str()))).unwrap();
        assert_eq!(decoded, q);

        let multi = Query::new().ascending("a").descending("b");
        let params = multi.to_params();
        assert_eq!(params[0].1, r#"[["a",1],["b",-1]]"#);
        let decoded =
            Query::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str()))).unwrap();
        assert_eq!(decoded, multi);
    }

    #[test]
    fn from_params_rejects_garbage() {
        assert!(Query::from_params([("skip", "-1")]).is_err());
        assert!(Query::from_params([("query", "[1]")]).is_err());
        assert!(Query::from_params([("sort", r#"{"a": 2}"#)]).is_err());
        assert!(Query::from_params([("query", "{not json")]).is_err());
        assert!(Query::from_params([("fields", "a,b")]).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn cache_key_ignores_insertion_order(
            fields in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 1..6)
        ) {
            let forward = fields
                .iter()
                .fold(Query::new(), |q, (k, v)| q.equal_to(k, *v));
            let backward = fields
                .iter()
                .rev()
                .fold(Query::new(), |q, (k, v)| q.equal_to(k, *v));

            prop_assert_eq!(forward.cache_key(), backward.cache_key());
        }
    }
}
