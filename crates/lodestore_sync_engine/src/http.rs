//! HTTP transport implementation.
//!
//! [`HttpTransport`] sends [`Request`]s to a REST backend with `reqwest`.
//! Credentials come from a [`SessionProvider`] so the sync engine itself
//! stays identity-agnostic.

use crate::error::{SyncError, SyncResult};
use crate::transport::{AuthMode, Method, Request, Response, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Supplies the `Authorization` header for a request.
pub trait SessionProvider: Send + Sync {
    /// Returns the header value for `mode`, or `None` to send no credentials.
    fn authorization(&self, mode: AuthMode) -> Option<String>;
}

/// A session provider with fixed credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    session_token: Option<String>,
    app_credentials: Option<String>,
}

impl StaticSession {
    /// Creates a provider with a user session token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            session_token: Some(token.into()),
            app_credentials: None,
        }
    }

    /// Sets base64-encoded application credentials.
    pub fn with_app_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.app_credentials = Some(credentials.into());
        self
    }
}

impl SessionProvider for StaticSession {
    fn authorization(&self, mode: AuthMode) -> Option<String> {
        match mode {
            AuthMode::Session => self
                .session_token
                .as_ref()
                .map(|token| format!("Bearer {token}")),
            AuthMode::App => self
                .app_credentials
                .as_ref()
                .map(|credentials| format!("Basic {credentials}")),
            AuthMode::None => None,
        }
    }
}

/// HTTP-based transport.
///
/// Uses JSON request and response bodies.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    session: Option<Arc<dyn SessionProvider>>,
}

impl HttpTransport {
    /// Creates a new HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the HTTP client can't be built.
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            session: None,
        })
    }

    /// Sets the session provider.
    pub fn with_session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_decode() {
        SyncError::Protocol(err.to_string())
    } else {
        SyncError::NetworkUnavailable(err.to_string())
    }
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> SyncResult<Response> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, self.url(&request.path))
            .query(&request.params);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(header) = self
            .session
            .as_ref()
            .and_then(|session| session.authorization(request.auth))
        {
            builder = builder.header(reqwest::header::AUTHORIZATION, header);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;

        tracing::debug!(method = %request.method, path = %request.path, status, "http request");

        Response {
            status,
            headers,
            body: decode_body(&bytes),
        }
        .error_for_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transport_creation() {
        let transport = HttpTransport::new("https://api.example.com/").unwrap();
        assert_eq!(transport.base_url(), "https://api.example.com");
        assert_eq!(
            transport.url("/appdata/books"),
            "https://api.example.com/appdata/books"
        );
    }

    #[test]
    fn static_session_headers() {
        let session = StaticSession::with_token("abc").with_app_credentials("a2lk");
        assert_eq!(
            session.authorization(AuthMode::Session).as_deref(),
            Some("Bearer abc")
        );
        assert_eq!(
            session.authorization(AuthMode::App).as_deref(),
            Some("Basic a2lk")
        );
        assert_eq!(session.authorization(AuthMode::None), None);
        assert_eq!(StaticSession::default().authorization(AuthMode::Session), None);
    }

    #[test]
    fn body_decoding() {
        assert_eq!(decode_body(b""), Value::Null);
        assert_eq!(decode_body(br#"{"count": 1}"#), json!({"count": 1}));
        assert_eq!(decode_body(b"oops"), json!("oops"));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_unavailable() {
        let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
        let result = transport.execute(Request::get("/appdata/books")).await;
        assert!(matches!(result, Err(SyncError::NetworkUnavailable(_))));
    }
}
