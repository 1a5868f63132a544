//! Collection requests against the backend.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Request, Response, Transport};
use lodestore_storage::Document;
use lodestore_sync_protocol::{CountResponse, DeltaSetResponse, Query};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Backend endpoints of one collection: `/{namespace}/{collection}`.
#[derive(Clone)]
pub(crate) struct Network {
    transport: Arc<dyn Transport>,
    base_path: String,
}

impl Network {
    pub fn new(transport: Arc<dyn Transport>, namespace: &str, collection: &str) -> Self {
        Self {
            transport,
            base_path: format!("/{namespace}/{collection}"),
        }
    }

    async fn send(&self, request: Request, timeout: Option<Duration>) -> SyncResult<Response> {
        let request = request.with_timeout(timeout);
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.execute(request))
                .await
                .map_err(|_| SyncError::Timeout)??,
            None => self.transport.execute(request).await?,
        };
        response.error_for_status()
    }

    fn entity_path(&self, id: &str) -> String {
        format!("{}/{id}", self.base_path)
    }

    /// Fetches the documents matching `query` and the request timestamp.
    pub async fn find(
        &self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> SyncResult<(Vec<Document>, Option<String>)> {
        let request = Request::get(self.base_path.clone()).with_params(query.to_params());
        let response = self.send(request, timeout).await?;
        let docs = response.json()?;
        Ok((docs, response.request_start()))
    }

    pub async fn count(
        &self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> SyncResult<(u64, Option<String>)> {
        let request = Request::get(format!("{}/_count", self.base_path))
            .with_params(query.filter_only().to_params());
        let response = self.send(request, timeout).await?;
        let body: CountResponse = response.json()?;
        Ok((body.count, response.request_start()))
    }

    pub async fn find_by_id(&self, id: &str, timeout: Option<Duration>) -> SyncResult<Document> {
        let response = self.send(Request::get(self.entity_path(id)), timeout).await?;
        response.json()
    }

    pub async fn create(&self, doc: Document, timeout: Option<Duration>) -> SyncResult<Document> {
        let request = Request::post(self.base_path.clone(), Value::Object(doc));
        self.send(request, timeout).await?.json()
    }

    pub async fn update(
        &self,
        id: &str,
        doc: Document,
        timeout: Option<Duration>,
    ) -> SyncResult<Document> {
        let request = Request::put(self.entity_path(id), Value::Object(doc));
        self.send(request, timeout).await?.json()
    }

    pub async fn delete(&self, id: &str, timeout: Option<Duration>) -> SyncResult<()> {
        self.send(Request::delete(self.entity_path(id)), timeout)
            .await
            .map(|_| ())
    }

    /// Fetches what changed under `query` since `since`.
    pub async fn delta_set(
        &self,
        query: &Query,
        since: &str,
        timeout: Option<Duration>,
    ) -> SyncResult<(DeltaSetResponse, Option<String>)> {
        let request = Request::get(format!("{}/_deltaset", self.base_path))
            .with_param("since", since)
            .with_params(query.to_params());
        let response = self.send(request, timeout).await?;
        let body = response.json()?;
        Ok((body, response.request_start()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        requests: Mutex<Vec<Request>>,
        response: Response,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn execute(&self, request: Request) -> SyncResult<Response> {
            self.requests.lock().push(request);
            tokio::time::sleep(self.delay).await;
            self.response.clone().error_for_status()
        }
    }

    fn recorder(response: Response, delay: Duration) -> Arc<Recorder> {
        Arc::new(Recorder {
            requests: Mutex::new(Vec::new()),
            response,
            delay,
        })
    }

    #[tokio::test]
    async fn paths_and_params() {
        let transport = recorder(
            Response::new(200, json!({"count": 2})).with_header("x-request-start", "7"),
            Duration::ZERO,
        );
        let network = Network::new(transport.clone(), "appdata", "books");

        let query = Query::new().equal_to("a", 1).limit(3);
        let (count, ts) = network.count(&query, None).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(ts.as_deref(), Some("7"));

        let requests = transport.requests.lock();
        assert_eq!(requests[0].path, "/appdata/books/_count");
        assert_eq!(requests[0].param("query"), Some(r#"{"a":1}"#));
        assert_eq!(requests[0].param("limit"), None);
    }

    #[tokio::test]
    async fn delta_set_sends_since() {
        let transport = recorder(
            Response::new(200, json!({"changed": [], "deleted": [{"_id": "x"}]})),
            Duration::ZERO,
        );
        let network = Network::new(transport.clone(), "appdata", "books");

        let (delta, ts) = network.delta_set(&Query::new(), "0005", None).await.unwrap();
        assert_eq!(delta.deleted.len(), 1);
        assert!(ts.is_none());

        let requests = transport.requests.lock();
        assert_eq!(requests[0].path, "/appdata/books/_deltaset");
        assert_eq!(requests[0].param("since"), Some("0005"));
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let transport = recorder(Response::new(200, json!([])), Duration::from_millis(200));
        let network = Network::new(transport, "appdata", "books");

        let result = network
            .find(&Query::new(), Some(Duration::from_millis(10)))
            .await;
        assert!(matches!(result, Err(SyncError::Timeout)));
    }

    #[tokio::test]
    async fn entity_paths() {
        let transport = recorder(Response::new(200, json!({"_id": "a"})), Duration::ZERO);
        let network = Network::new(transport.clone(), "appdata", "books");

        network.find_by_id("a", None).await.unwrap();
        network.update("a", Document::new(), None).await.unwrap();
        network.delete("a", None).await.unwrap();

        let requests = transport.requests.lock();
        assert!(requests.iter().all(|r| r.path == "/appdata/books/a"));
        assert_eq!(requests[1].method, crate::transport::Method::Put);
    }
}
