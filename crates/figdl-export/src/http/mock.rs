//! Mock transport for testing.
//!
//! Provides [`MockTransport`] for exercising HTTP code without a network.
//! Requests are routed by URL substring, in registration order.

use std::io::{self, Cursor, Read};
use std::sync::Mutex;

use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::error::{TransportError, TransportErrorKind};

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// An HTTP response.
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// A response whose body fails with `error` once `body` has been read.
    BrokenBody {
        status: u16,
        body: Vec<u8>,
        error: io::ErrorKind,
    },
    /// A transport failure.
    Error(TransportError),
}

impl MockReply {
    /// A `200 OK` response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, body)
    }

    /// A response with the given status.
    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::Response {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A JSON response.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::status(status, value.to_string())
            .with_header("Content-Type", "application/json")
    }

    /// A transport failure.
    pub fn error(kind: TransportErrorKind, message: &str) -> Self {
        Self::Error(TransportError::new(kind, message))
    }

    /// A `200 OK` response that drops the connection after `partial`.
    pub fn broken_body(partial: impl Into<Vec<u8>>, error: io::ErrorKind) -> Self {
        Self::BrokenBody {
            status: 200,
            body: partial.into(),
            error,
        }
    }

    /// Add a response header. No effect on other replies.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Self::Response { headers, .. } = &mut self {
            headers.push((name.to_owned(), value.to_owned()));
        }
        self
    }

    fn into_result(self) -> Result<HttpResponse, TransportError> {
        match self {
            Self::Response {
                status,
                headers,
                body,
            } => Ok(HttpResponse::new(status, headers, Box::new(Cursor::new(body)))),
            Self::BrokenBody {
                status,
                body,
                error,
            } => {
                let reader = BrokenReader {
                    data: Cursor::new(body),
                    error,
                };
                Ok(HttpResponse::new(status, Vec::new(), Box::new(reader)))
            }
            Self::Error(err) => Err(err),
        }
    }
}

/// Yields its data, then fails instead of reporting end of stream.
struct BrokenReader {
    data: Cursor<Vec<u8>>,
    error: io::ErrorKind,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::new(self.error, "connection dropped mid-body"));
        }
        Ok(n)
    }
}

type Handler = Box<dyn Fn(&HttpRequest) -> MockReply + Send + Sync>;

enum Responder {
    /// Replies served in order; the last one repeats.
    Script { replies: Vec<MockReply>, next: usize },
    Handler(Handler),
}

struct Route {
    pattern: String,
    responder: Responder,
}

/// Mock transport for testing.
///
/// Unmatched requests get a `404`. Every request is recorded.
///
/// # Example
///
/// ```ignore
/// let transport = MockTransport::new()
///     .with_reply("/files/KEY", MockReply::json(200, &document))
///     .with_replies("/images/KEY", vec![MockReply::status(500, ""), MockReply::json(200, &urls)]);
/// ```
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Create a transport with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose URL contains `pattern` with `reply`.
    ///
    /// Calling this again for the same pattern queues another reply.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn with_reply(self, pattern: &str, reply: MockReply) -> Self {
        self.with_replies(pattern, vec![reply])
    }

    /// Answer requests whose URL contains `pattern` with `replies` in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn with_replies(self, pattern: &str, replies: Vec<MockReply>) -> Self {
        {
            let mut routes = self.routes.lock().unwrap();
            let existing = routes.iter_mut().find(|route| route.pattern == pattern);
            match existing {
                Some(Route {
                    responder: Responder::Script { replies: queue, .. },
                    ..
                }) => queue.extend(replies),
                _ => routes.push(Route {
                    pattern: pattern.to_owned(),
                    responder: Responder::Script { replies, next: 0 },
                }),
            }
        }
        self
    }

    /// Answer requests whose URL contains `pattern` by calling `handler`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn with_handler(
        self,
        pattern: &str,
        handler: impl Fn(&HttpRequest) -> MockReply + Send + Sync + 'static,
    ) -> Self {
        self.routes.lock().unwrap().push(Route {
            pattern: pattern.to_owned(),
            responder: Responder::Handler(Box::new(handler)),
        });
        self
    }

    /// All requests served so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL contains `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn requests_to(&self, pattern: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.contains(pattern))
            .cloned()
            .collect()
    }

    /// Number of requests whose URL contains `pattern`.
    pub fn request_count(&self, pattern: &str) -> usize {
        self.requests_to(pattern).len()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            routes
                .iter_mut()
                .find(|route| request.url.contains(&route.pattern))
                .and_then(|route| match &mut route.responder {
                    Responder::Script { replies, next } => {
                        let reply = replies.get(*next).or_else(|| replies.last()).cloned();
                        *next += 1;
                        reply
                    }
                    Responder::Handler(handler) => Some(handler(request)),
                })
        };

        reply
            .unwrap_or_else(|| MockReply::status(404, format!("no mock route for {}", request.url)))
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replies_then_last_repeats() {
        let transport = MockTransport::new()
            .with_reply("/a", MockReply::status(500, "first"))
            .with_reply("/a", MockReply::ok("second"));
        let request = HttpRequest::get("https://x.test/a");

        assert_eq!(transport.send(&request).unwrap().status(), 500);
        assert_eq!(transport.send(&request).unwrap().status(), 200);
        assert_eq!(transport.send(&request).unwrap().status(), 200);
        assert_eq!(transport.request_count("/a"), 3);
    }

    #[test]
    fn test_handler_sees_request() {
        let transport = MockTransport::new().with_handler("/echo", |request| {
            MockReply::ok(request.query_param("ids").unwrap_or_default())
        });

        let body = transport
            .send(&HttpRequest::get("https://x.test/echo").query("ids", "1:2"))
            .unwrap()
            .into_bytes()
            .unwrap();
        assert_eq!(body, b"1:2");
    }

    #[test]
    fn test_unmatched_route_is_404() {
        let transport = MockTransport::new();
        let response = transport.send(&HttpRequest::get("https://x.test/none")).unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_broken_body_fails_after_partial_data() {
        let transport = MockTransport::new().with_reply(
            "/cut",
            MockReply::broken_body("abc", io::ErrorKind::ConnectionReset),
        );
        let mut body = transport
            .send(&HttpRequest::get("https://x.test/cut"))
            .unwrap()
            .into_reader();

        let mut buf = [0u8; 8];
        assert_eq!(body.read(&mut buf).unwrap(), 3);
        let err = body.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_error_reply() {
        let transport = MockTransport::new()
            .with_reply("/down", MockReply::error(TransportErrorKind::Connect, "refused"));
        let err = transport.send(&HttpRequest::get("https://x.test/down")).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect);
    }
}
