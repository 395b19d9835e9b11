//! HTTP plumbing: the transport seam, retry policy and the mock transport.

#[cfg(any(test, feature = "mock"))]
pub(crate) mod mock;
mod retry;
mod transport;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockReply, MockTransport};
pub use retry::{DEFAULT_BASE_DELAY, RetryPolicy, Retryable, RetryingClient, pause};
pub use transport::{HttpRequest, HttpResponse, Method, Transport, UreqTransport};
