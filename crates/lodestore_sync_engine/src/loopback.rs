//! In-process REST backend.
//!
//! [`LoopbackBackend`] implements [`Transport`] directly, so stores can be
//! exercised end to end without a network. It keeps collections in memory,
//! stamps every response with a logical clock in `x-request-start`, records
//! tombstones for delta sets, and lets tests inject latency, failures and
//! outages.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Method, Request, Response, Transport, REQUEST_START_HEADER};
use async_trait::async_trait;
use lodestore_storage::{document_id, Document, ID_ATTRIBUTE};
use lodestore_sync_protocol::{generate_id, ErrorBody, Query, KMD_ATTRIBUTE};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// A request seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Query string parameters.
    pub params: Vec<(String, String)>,
}

impl RecordedRequest {
    /// Returns the first value of a parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
struct Stored {
    doc: Document,
    modified: u64,
}

#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, Stored>,
    tombstones: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct Failure {
    matcher: Query,
    status: u16,
}

#[derive(Debug)]
struct BackendState {
    clock: u64,
    collections: HashMap<String, Collection>,
    failures: Vec<Failure>,
    offline: bool,
    delta_set_enabled: bool,
    latency: Duration,
    requests: Vec<RecordedRequest>,
}

/// An in-memory backend serving `/{namespace}/{collection}` routes.
///
/// Supported routes:
/// - `GET /{ns}/{coll}` with `query`, `sort`, `skip`, `limit`
/// - `GET /{ns}/{coll}/_count`
/// - `GET /{ns}/{coll}/_deltaset?since=...`
/// - `GET|PUT|DELETE /{ns}/{coll}/{id}`
/// - `POST /{ns}/{coll}`
///
/// Collections are keyed by name only; the namespace segment is ignored.
#[derive(Debug)]
pub struct LoopbackBackend {
    state: Mutex<BackendState>,
}

impl LoopbackBackend {
    /// Creates an empty backend with delta sets enabled.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState {
                clock: 0,
                collections: HashMap::new(),
                failures: Vec::new(),
                offline: false,
                delta_set_enabled: true,
                latency: Duration::ZERO,
                requests: Vec::new(),
            }),
        }
    }

    /// Inserts documents directly, assigning ids where missing.
    ///
    /// Returns the stored documents.
    pub fn insert(&self, collection: &str, docs: Vec<Document>) -> Vec<Document> {
        let mut state = self.state.lock();
        let now = tick(&mut state);
        let coll = state.collections.entry(collection.to_string()).or_default();
        docs.into_iter()
            .map(|doc| store(coll, doc, now))
            .collect()
    }

    /// Deletes a document directly, leaving a tombstone.
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        let mut state = self.state.lock();
        let now = tick(&mut state);
        state
            .collections
            .get_mut(collection)
            .is_some_and(|coll| remove(coll, id, now))
    }

    /// Returns every document of a collection in id order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|coll| coll.docs.values().map(|s| s.doc.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns one document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .and_then(|coll| coll.docs.get(id))
            .map(|s| s.doc.clone())
    }

    /// Fails writes whose entity matches `matcher` with `status`.
    ///
    /// POST and PUT match the request body; DELETE and GET by id match
    /// `{"_id": id}`.
    pub fn fail_matching(&self, matcher: Query, status: u16) {
        self.state.lock().failures.push(Failure { matcher, status });
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Simulates losing connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Enables or disables the `_deltaset` endpoint.
    pub fn set_delta_set_enabled(&self, enabled: bool) {
        self.state.lock().delta_set_enabled = enabled;
    }

    /// Delays every request.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Returns the requests seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Returns the current logical time.
    pub fn clock(&self) -> u64 {
        self.state.lock().clock
    }

    fn handle(&self, request: &Request) -> Response {
        let mut state = self.state.lock();
        let now = tick(&mut state);

        let segments: Vec<&str> = request
            .path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let response = match (request.method, segments.as_slice()) {
            (Method::Get, [_, coll]) => list(&state, coll, request),
            (Method::Get, [_, coll, "_count"]) => count(&state, coll, request),
            (Method::Get, [_, coll, "_deltaset"]) => delta_set(&state, coll, request),
            (Method::Get, [_, coll, id]) => match injected(&state, &id_target(id)) {
                Some(failure) => failure,
                None => get(&state, coll, id),
            },
            (Method::Post, [_, coll]) => match body_target(request) {
                Ok(target) => match injected(&state, &target) {
                    Some(failure) => failure,
                    None => create(&mut state, coll, target, now),
                },
                Err(bad) => bad,
            },
            (Method::Put, [_, coll, id]) => match body_target(request) {
                Ok(mut target) => match injected(&state, &target) {
                    Some(failure) => failure,
                    None => {
                        target.insert(ID_ATTRIBUTE.to_string(), Value::String((*id).to_string()));
                        let coll = state.collections.entry((*coll).to_string()).or_default();
                        Response::new(200, Value::Object(store(coll, target, now)))
                    }
                },
                Err(bad) => bad,
            },
            (Method::Delete, [_, coll, id]) => match injected(&state, &id_target(id)) {
                Some(failure) => failure,
                None => {
                    let removed = state
                        .collections
                        .get_mut(*coll)
                        .is_some_and(|c| remove(c, id, now));
                    if removed {
                        Response::new(200, json!({"count": 1}))
                    } else {
                        not_found(id)
                    }
                }
            },
            _ => error(404, "NotFoundError", &format!("no route for {}", request.path)),
        };

        response.with_header(REQUEST_START_HEADER, format_timestamp(now))
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackBackend {
    async fn execute(&self, request: Request) -> SyncResult<Response> {
        let (offline, latency) = {
            let mut state = self.state.lock();
            state.requests.push(RecordedRequest {
                method: request.method,
                path: request.path.clone(),
                params: request.params.clone(),
            });
            (state.offline, state.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(SyncError::NetworkUnavailable(
                "loopback backend is offline".to_string(),
            ));
        }

        self.handle(&request).error_for_status()
    }
}

/// Timestamps are zero-padded so they order as strings.
fn format_timestamp(clock: u64) -> String {
    format!("{clock:020}")
}

fn tick(state: &mut BackendState) -> u64 {
    state.clock += 1;
    state.clock
}

fn store(coll: &mut Collection, mut doc: Document, now: u64) -> Document {
    let id = match document_id(&doc) {
        Some(id) => id.to_string(),
        None => {
            let id = generate_id();
            doc.insert(ID_ATTRIBUTE.to_string(), Value::String(id.clone()));
            id
        }
    };
    doc.insert(
        KMD_ATTRIBUTE.to_string(),
        json!({ "lmt": format_timestamp(now) }),
    );
    coll.tombstones.remove(&id);
    coll.docs.insert(
        id,
        Stored {
            doc: doc.clone(),
            modified: now,
        },
    );
    doc
}

fn remove(coll: &mut Collection, id: &str, now: u64) -> bool {
    if coll.docs.remove(id).is_some() {
        coll.tombstones.insert(id.to_string(), now);
        true
    } else {
        false
    }
}

fn error(status: u16, name: &str, description: &str) -> Response {
    let body = serde_json::to_value(ErrorBody::new(name, description)).unwrap_or(Value::Null);
    Response::new(status, body)
}

fn not_found(id: &str) -> Response {
    error(404, "EntityNotFound", &format!("entity {id} not found"))
}

fn id_target(id: &str) -> Document {
    let mut doc = Document::new();
    doc.insert(ID_ATTRIBUTE.to_string(), Value::String(id.to_string()));
    doc
}

fn body_target(request: &Request) -> Result<Document, Response> {
    match &request.body {
        Some(Value::Object(doc)) => Ok(doc.clone()),
        _ => Err(error(400, "BadRequest", "request body must be a JSON object")),
    }
}

fn injected(state: &BackendState, target: &Document) -> Option<Response> {
    state
        .failures
        .iter()
        .find(|failure| failure.matcher.matches(target))
        .map(|failure| error(failure.status, "InjectedFailure", "injected failure"))
}

fn parse_query(request: &Request) -> Result<Query, Response> {
    Query::from_params(
        request
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str())),
    )
    .map_err(|e| error(400, "BadRequest", &e.to_string()))
}

fn all_docs(state: &BackendState, coll: &str) -> Vec<Document> {
    state
        .collections
        .get(coll)
        .map(|c| c.docs.values().map(|s| s.doc.clone()).collect())
        .unwrap_or_default()
}

fn list(state: &BackendState, coll: &str, request: &Request) -> Response {
    match parse_query(request) {
        Ok(query) => Response::new(200, Value::Array(
            query
                .process(all_docs(state, coll))
                .into_iter()
                .map(Value::Object)
                .collect(),
        )),
        Err(bad) => bad,
    }
}

fn count(state: &BackendState, coll: &str, request: &Request) -> Response {
    match parse_query(request) {
        Ok(query) => {
            let count = all_docs(state, coll)
                .iter()
                .filter(|doc| query.matches(doc))
                .count();
            Response::new(200, json!({ "count": count }))
        }
        Err(bad) => bad,
    }
}

fn get(state: &BackendState, coll: &str, id: &str) -> Response {
    state
        .collections
        .get(coll)
        .and_then(|c| c.docs.get(id))
        .map(|s| Response::new(200, Value::Object(s.doc.clone())))
        .unwrap_or_else(|| not_found(id))
}

fn create(state: &mut BackendState, coll: &str, doc: Document, now: u64) -> Response {
    let collection = state.collections.entry(coll.to_string()).or_default();
    if document_id(&doc).is_some_and(|id| collection.docs.contains_key(id)) {
        return error(409, "EntityAlreadyExists", "an entity with this _id already exists");
    }
    Response::new(201, Value::Object(store(collection, doc, now)))
}

fn delta_set(state: &BackendState, coll: &str, request: &Request) -> Response {
    if !state.delta_set_enabled {
        return error(403, "FeatureUnavailable", "delta set is disabled for this collection");
    }
    let query = match parse_query(request) {
        Ok(query) => query,
        Err(bad) => return bad,
    };
    if !query.is_delta_eligible() {
        return error(400, "ParameterValueOutOfRange", "delta set does not support skip or limit");
    }
    let Some(since) = request.param("since").and_then(|s| s.parse::<u64>().ok()) else {
        return error(400, "ParameterValueOutOfRange", "since must be a request timestamp");
    };

    let Some(collection) = state.collections.get(coll) else {
        return Response::new(200, json!({"changed": [], "deleted": []}));
    };
    let changed: Vec<Value> = collection
        .docs
        .values()
        .filter(|s| s.modified > since && query.matches(&s.doc))
        .map(|s| Value::Object(s.doc.clone()))
        .collect();
    let deleted: Vec<Value> = collection
        .tombstones
        .iter()
        .filter(|(_, at)| **at > since)
        .map(|(id, _)| json!({ "_id": id }))
        .collect();

    Response::new(200, json!({ "changed": changed, "deleted": deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn crud_routes() {
        let backend = LoopbackBackend::new();

        let created = backend
            .execute(Request::post("/appdata/books", json!({"title": "Dune"})))
            .await
            .unwrap();
        assert_eq!(created.status, 201);
        let id = created.body["_id"].as_str().unwrap().to_string();

        let fetched = backend
            .execute(Request::get(format!("/appdata/books/{id}")))
            .await
            .unwrap();
        assert_eq!(fetched.body["title"], "Dune");

        backend
            .execute(Request::put(format!("/appdata/books/{id}"), json!({"title": "Emma"})))
            .await
            .unwrap();
        assert_eq!(backend.document("books", &id).unwrap()["title"], "Emma");

        backend
            .execute(Request::delete(format!("/appdata/books/{id}")))
            .await
            .unwrap();
        let gone = backend
            .execute(Request::delete(format!("/appdata/books/{id}")))
            .await;
        assert!(gone.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_and_count_apply_query() {
        let backend = LoopbackBackend::new();
        backend.insert(
            "books",
            vec![
                doc(json!({"_id": "1", "n": 1})),
                doc(json!({"_id": "2", "n": 2})),
                doc(json!({"_id": "3", "n": 3})),
            ],
        );

        let request = Request::get("/appdata/books")
            .with_params(Query::new().greater_than("n", 1).limit(1).to_params());
        let response = backend.execute(request).await.unwrap();
        assert_eq!(response.body.as_array().unwrap().len(), 1);

        let request = Request::get("/appdata/books/_count")
            .with_params(Query::new().greater_than("n", 1).to_params());
        let response = backend.execute(request).await.unwrap();
        assert_eq!(response.body["count"], 2);
    }

    #[tokio::test]
    async fn responses_carry_increasing_timestamps() {
        let backend = LoopbackBackend::new();
        let first = backend.execute(Request::get("/appdata/books")).await.unwrap();
        let second = backend.execute(Request::get("/appdata/books")).await.unwrap();

        let a = first.request_start().unwrap();
        let b = second.request_start().unwrap();
        assert_eq!(a.len(), 20);
        assert!(a < b);
    }

    #[tokio::test]
    async fn delta_set_reports_changes_and_tombstones() {
        let backend = LoopbackBackend::new();
        backend.insert("books", vec![doc(json!({"_id": "1"})), doc(json!({"_id": "2"}))]);
        let since = format_timestamp(backend.clock());

        backend.insert("books", vec![doc(json!({"_id": "3"}))]);
        backend.delete("books", "1");

        let response = backend
            .execute(Request::get("/appdata/books/_deltaset").with_param("since", since))
            .await
            .unwrap();
        assert_eq!(response.body["changed"], json!([{"_id": "3", "_kmd": {"lmt": format_timestamp(2)}}]));
        assert_eq!(response.body["deleted"], json!([{"_id": "1"}]));
    }

    #[tokio::test]
    async fn delta_set_can_be_disabled() {
        let backend = LoopbackBackend::new();
        backend.set_delta_set_enabled(false);

        let result = backend
            .execute(Request::get("/appdata/books/_deltaset").with_param("since", "1"))
            .await;
        assert!(matches!(result, Err(SyncError::DeltaSetUnavailable(_))));
    }

    #[tokio::test]
    async fn injected_failures_and_offline() {
        let backend = LoopbackBackend::new();
        backend.fail_matching(Query::new().equal_to("name", "b"), 500);

        let result = backend
            .execute(Request::post("/appdata/books", json!({"name": "b"})))
            .await;
        assert!(matches!(result, Err(SyncError::ServerError { status: 500, .. })));

        backend.clear_failures();
        backend.set_offline(true);
        let result = backend.execute(Request::get("/appdata/books")).await;
        assert!(matches!(result, Err(SyncError::NetworkUnavailable(_))));

        assert_eq!(backend.requests().len(), 2);
        backend.clear_requests();
        assert!(backend.requests().is_empty());
    }
}
