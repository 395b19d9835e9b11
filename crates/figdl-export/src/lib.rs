//! Figma asset export pipeline.
//!
//! This crate exports the top-level frames and components of a Figma file to
//! a local directory tree:
//!
//! - [`select_top_level`] / [`select_scoped`] pick the nodes to export
//! - [`PathAllocator`] maps them to unique, filesystem-safe paths
//! - [`ExportBatcher`] requests render URLs in batches, shrinking the batch
//!   size when the service rejects a batch
//! - [`AssetDownloader`] streams each image to disk, optionally through a
//!   [`Compressor`]
//! - [`Pipeline`] runs the whole thing and returns a [`RunSummary`]
//! - [`Pipeline::run_images`] renders listed nodes to [`image_file_name`]
//!   files instead of walking the document
//!
//! All HTTP goes through the [`Transport`] trait and a [`RetryingClient`]
//! with linear backoff. [`MockTransport`] (behind the `mock` feature) replays
//! scripted responses for tests.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use figdl_export::{ExportConfig, FileSource, Pipeline, UreqTransport};
//!
//! let config = ExportConfig::default();
//! let transport = UreqTransport::new(config.request_timeout);
//! let pipeline = Pipeline::new(config, token, transport);
//! let summary = pipeline.run(&FileSource::parse("https://www.figma.com/design/KEY/App")?)?;
//! println!("{}/{} exported", summary.succeeded, summary.attempted);
//! ```

mod batcher;
mod client;
mod compress;
mod config;
mod document;
mod download;
mod error;
mod format;
pub mod http;
mod images;
mod paths;
mod pipeline;
mod selector;
mod source;

pub use batcher::{ExportBatcher, RenderOutcome};
pub use client::FigmaClient;
pub use compress::{
    CompressOutcome, Compressor, DEFAULT_RELAY_URL, RelayCompressor, TINIFY_SHRINK_URL,
    TinifyCompressor, compress_or_original,
};
pub use config::{DEFAULT_API_BASE_URL, DEFAULT_BATCH_SIZE, DEFAULT_SCALE, ExportConfig, SCALE_RANGE};
pub use document::{DocumentNode, FileResponse, NodeType};
pub use download::{AssetDownloader, Placed};
pub use error::{
    ApiError, CompressError, DownloadError, ExportError, FailureClass, SourceError,
    TransportError, TransportErrorKind,
};
pub use format::ImageFormat;
pub use images::{ImageTarget, image_file_name, image_targets};
#[cfg(any(test, feature = "mock"))]
pub use http::{MockReply, MockTransport};
pub use http::{
    HttpRequest, HttpResponse, RetryPolicy, Retryable, RetryingClient, Transport, UreqTransport,
};
pub use paths::{PathAllocator, ResolvedPath, sanitize_component, sanitize_node_id};
pub use pipeline::{CandidateResult, ExportResult, PlannedAsset, Pipeline, RunSummary};
pub use selector::{
    DEFAULT_NODE_NAME, DEFAULT_PAGE_NAME, ExportCandidate, select_scoped, select_top_level,
};
pub use source::{FileSource, UrlList, normalize_node_id, parse_url_list};
