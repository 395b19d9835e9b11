//! Error types for the export pipeline.
//!
//! Errors are layered the same way the pipeline is:
//!
//! - [`TransportError`]: the request never produced an HTTP response
//! - [`ApiError`]: a remote call failed (transport, status or body)
//! - [`DownloadError`] / [`CompressError`]: per-asset failures
//! - [`ExportError`]: failures that abort the whole run

use std::fmt;
use std::path::PathBuf;

use crate::format::ImageFormat;
use crate::http::Retryable;

/// Category of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// Connection refused, reset, or host lookup failed.
    Connect,
    /// I/O error while sending or receiving.
    Io,
    /// The request itself is malformed (bad URL, bad header).
    InvalidRequest,
    /// Any other transport failure (including TLS handshake errors).
    Other,
}

impl TransportErrorKind {
    /// Whether a request failing this way may succeed when sent again.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidRequest)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Connect => "connection failed",
            Self::Io => "I/O error",
            Self::InvalidRequest => "invalid request",
            Self::Other => "transport error",
        };
        f.write_str(s)
    }
}

/// A request that did not produce an HTTP response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// Failure category.
    pub kind: TransportErrorKind,
    /// Underlying error message.
    pub message: String,
}

impl TransportError {
    /// Create a transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a transport error from an I/O error raised while reading a body.
    pub fn from_io(err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Connect,
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

/// Failure taxonomy of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection, TLS or timeout failure.
    TransientNetwork,
    /// 429 or 5xx.
    RateLimitedOrServerBusy,
    /// 4xx other than 429.
    ClientRequest,
    /// Malformed response body or unexpected status.
    Other,
}

/// Error from a remote API call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status code, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify the failure.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(_) => FailureClass::TransientNetwork,
            Self::Status {
                status: 429 | 500..=599,
                ..
            } => FailureClass::RateLimitedOrServerBusy,
            Self::Status {
                status: 400..=499,
                ..
            } => FailureClass::ClientRequest,
            _ => FailureClass::Other,
        }
    }
}

impl Retryable for ApiError {
    /// Only transport failures, including a body cut off mid-read. Status
    /// retries happen before the body is read.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::Status { .. } | Self::Json(_) => false,
        }
    }
}

/// Error parsing a Figma file URL or key.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// No input given.
    #[error("Figma URL or file key is empty")]
    Empty,
    /// Input is neither a file key nor a Figma file URL.
    #[error("cannot find a Figma file key in '{0}'")]
    Unrecognized(String),
}

/// Error from a compression collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    /// The compression service could not be reached.
    #[error("{0}")]
    Transport(#[from] TransportError),
    /// The compression service rejected the request.
    #[error("{0}")]
    Api(#[from] ApiError),
    /// The service accepted the image but did not say where the output is.
    #[error("compression service returned no output URL")]
    MissingOutput,
    /// The compressor does not handle this format.
    #[error("{0} images are not supported")]
    Unsupported(ImageFormat),
}

/// Error downloading a single rendered asset.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The render URL could not be fetched.
    #[error("{0}")]
    Transport(#[from] TransportError),
    /// The render URL answered with an error status.
    #[error("{0}")]
    Api(#[from] ApiError),
    /// Writing the asset to disk failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl Retryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::Api(err) => err.is_retryable(),
            Self::Io { .. } => false,
        }
    }
}

/// Error that aborts an export run.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Invalid export settings (detected before any network activity).
    #[error("invalid export configuration: {0}")]
    Config(String),

    /// The document tree could not be fetched.
    #[error("failed to fetch file {file_key}: {source}")]
    Document {
        /// Figma file key.
        file_key: String,
        /// Underlying API error.
        #[source]
        source: ApiError,
    },

    /// The requested node does not exist in the document.
    #[error("node {0} not found in document")]
    NodeNotFound(String),

    /// A render request failed in a way batch-size reduction cannot recover.
    #[error("render request for {size} node(s) failed: {source}")]
    Batch {
        /// Number of nodes in the failed batch.
        size: usize,
        /// Underlying API error.
        #[source]
        source: ApiError,
    },
}
