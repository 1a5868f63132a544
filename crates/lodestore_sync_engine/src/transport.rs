//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Response header carrying the server time at which a request started.
pub const REQUEST_START_HEADER: &str = "x-request-start";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Delete.
    Delete,
}

impl Method {
    /// Returns the method name.
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

/// Which credentials a request is sent with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// The active user session.
    #[default]
    Session,
    /// Application credentials.
    App,
    /// No credentials.
    None,
}

/// A request to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Path below the backend base URL, starting with `/`.
    pub path: String,
    /// Query string parameters.
    pub params: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Credentials to attach.
    pub auth: AuthMode,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
}

impl Request {
    /// Creates a request without body or parameters.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            auth: AuthMode::default(),
            timeout: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// Creates a PUT request with a JSON body.
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Appends parameters.
    pub fn with_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    /// Appends one parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Sets the credentials.
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the first value of a parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A response from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// JSON body, `Null` when empty.
    pub body: Value,
}

impl Response {
    /// Creates a response without headers.
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    /// Adds a header; the name is lowercased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the server request timestamp, if the backend sent one.
    pub fn request_start(&self) -> Option<String> {
        self.header(REQUEST_START_HEADER).map(str::to_string)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into an error.
    pub fn error_for_status(self) -> SyncResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::from_response(self.status, &self.body))
        }
    }

    /// Decodes the body.
    pub fn json<T: DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| SyncError::Protocol(format!("unexpected response body: {e}")))
    }
}

/// A transport executes requests against the backend.
///
/// Implementations return `Err` for non-2xx responses, normally through
/// [`Response::error_for_status`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes one request.
    async fn execute(&self, request: Request) -> SyncResult<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builder() {
        let request = Request::get("/appdata/books")
            .with_param("limit", "5")
            .with_auth(AuthMode::App)
            .with_timeout(Some(Duration::from_secs(1)));

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.param("limit"), Some("5"));
        assert_eq!(request.param("skip"), None);
        assert_eq!(request.auth, AuthMode::App);
        assert_eq!(request.method.to_string(), "GET");
    }

    #[test]
    fn headers_are_case_insensitive() {
        let response = Response::new(200, Value::Null).with_header("X-Request-Start", "0042");
        assert_eq!(response.header("x-request-start"), Some("0042"));
        assert_eq!(response.request_start().as_deref(), Some("0042"));
    }

    #[test]
    fn error_for_status_maps_body() {
        let ok = Response::new(201, json!({"_id": "a"})).error_for_status();
        assert!(ok.is_ok());

        let err = Response::new(404, json!({"error": "EntityNotFound"}))
            .error_for_status()
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn json_decoding() {
        #[derive(serde::Deserialize)]
        struct Count {
            count: u64,
        }

        let response = Response::new(200, json!({"count": 3}));
        assert_eq!(response.json::<Count>().unwrap().count, 3);

        let response = Response::new(200, json!([1, 2]));
        assert!(matches!(response.json::<Count>(), Err(SyncError::Protocol(_))));
    }
}
