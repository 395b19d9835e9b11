//! Blocking HTTP transport.
//!
//! [`Transport`] is the seam between the pipeline and the network. The
//! production implementation, [`UreqTransport`], wraps a `ureq` agent that
//! reports HTTP error statuses as responses so callers can decide what to do
//! with them.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use ureq::{Agent, RequestBuilder};

use crate::error::{ApiError, TransportError, TransportErrorKind};

/// Longest error message kept from a non-JSON error body.
const MAX_ERROR_BODY: usize = 300;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// URL without query string.
    pub url: String,
    /// Query parameters, encoded by the transport.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Per-request timeout overriding the transport default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Create a POST request with a body.
    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        let mut request = Self::new(Method::Post, url);
        request.body = Some(body);
        request
    }

    /// Add a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a header (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response with a streaming body.
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Box<dyn Read>,
}

impl HttpResponse {
    /// Create a response from parts.
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Box<dyn Read>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a response with an in-memory body.
    pub fn from_bytes(status: u16, body: Vec<u8>) -> Self {
        Self::new(status, Vec::new(), Box::new(Cursor::new(body)))
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of a response header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Take the body as a reader.
    pub fn into_reader(self) -> Box<dyn Read> {
        self.body
    }

    /// Read the whole body.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::new();
        self.body
            .read_to_end(&mut buf)
            .map_err(|e| TransportError::from_io(&e))?;
        Ok(buf)
    }

    /// Read and decode a JSON body.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let bytes = self.into_bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Convert a non-success response into [`ApiError::Status`].
    ///
    /// Uses the JSON `message` or `err` field when present, otherwise the
    /// (truncated) raw body.
    pub fn into_error(self) -> ApiError {
        let status = self.status;
        let body = self
            .into_bytes()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_else(|_| "(unable to read error body)".to_owned());
        ApiError::Status {
            status,
            message: error_message(&body),
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "err", "error"] {
            if let Some(message) = value.get(field).and_then(serde_json::Value::as_str) {
                return message.to_owned();
            }
        }
    }
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_owned(),
    }
}

/// Sends HTTP requests.
pub trait Transport {
    /// Send a request and return the response, whatever its status.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

/// [`Transport`] backed by a `ureq` agent.
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    /// Create a transport whose requests time out after `timeout` unless the
    /// request sets its own.
    pub fn new(timeout: Duration) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let result = match request.method {
            Method::Get => prepare(self.agent.get(&request.url), request).call(),
            Method::Post => {
                let body = request.body.as_deref().unwrap_or_default();
                prepare(self.agent.post(&request.url), request).send(body)
            }
        };

        let response = result.map_err(|e| TransportError::new(classify(&e), e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned()))
            })
            .collect();
        let body = response.into_body().into_reader();

        Ok(HttpResponse::new(status, headers, Box::new(body)))
    }
}

fn prepare<B>(mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
    for (key, value) in &request.query {
        builder = builder.query(key, value);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(timeout) = request.timeout {
        builder = builder.config().timeout_global(Some(timeout)).build();
    }
    builder
}

fn classify(err: &ureq::Error) -> TransportErrorKind {
    match err {
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound => TransportErrorKind::Connect,
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            TransportErrorKind::Timeout
        }
        ureq::Error::Io(_) => TransportErrorKind::Io,
        ureq::Error::BadUri(_) | ureq::Error::Http(_) => TransportErrorKind::InvalidRequest,
        _ => TransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_json_fields() {
        assert_eq!(
            error_message(r#"{"status": 400, "err": "Invalid parameter: ids"}"#),
            "Invalid parameter: ids"
        );
        assert_eq!(
            error_message(r#"{"status": 403, "message": "Invalid token"}"#),
            "Invalid token"
        );
    }

    #[test]
    fn test_error_message_truncates_raw_bodies() {
        let body = "x".repeat(MAX_ERROR_BODY + 50);
        let message = error_message(&body);
        assert_eq!(message.len(), MAX_ERROR_BODY + 3);
        assert!(message.ends_with("..."));
        assert_eq!(error_message("  plain text \n"), "plain text");
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse::new(
            201,
            vec![("Compression-Count".to_owned(), "12".to_owned())],
            Box::new(Cursor::new(br#"{"ok": true}"#.to_vec())),
        );
        assert!(response.is_success());
        assert_eq!(response.header("compression-count"), Some("12"));

        let value: serde_json::Value = response.into_json().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_into_error() {
        let err = HttpResponse::from_bytes(404, br#"{"status": 404, "err": "Not found"}"#.to_vec())
            .into_error();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: Not found");
    }

    #[test]
    fn test_request_builders() {
        let request = HttpRequest::get("https://api.figma.com/v1/images/KEY")
            .query("ids", "1:2,1:3")
            .header("X-Figma-Token", "secret")
            .timeout(Duration::from_secs(5));
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query_param("ids"), Some("1:2,1:3"));
        assert_eq!(request.header_value("x-figma-token"), Some("secret"));
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }
}
