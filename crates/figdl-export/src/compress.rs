//! Optional image compression.
//!
//! A [`Compressor`] is an external collaborator. Compression is a
//! best-effort step: [`compress_or_original`] never fails and falls back to
//! the input bytes whenever the compressor is absent, declines the format,
//! errors, or does not make the image smaller.

use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::CompressError;
use crate::format::ImageFormat;
use crate::http::{HttpRequest, RetryPolicy, RetryingClient, Transport};

/// Tinify shrink endpoint.
pub const TINIFY_SHRINK_URL: &str = "https://api.tinify.com/shrink";

/// Default address of a local compression relay.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8765/compress";

/// Timeout for compression requests.
const COMPRESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Re-encodes image bytes.
pub trait Compressor {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether this compressor handles `format`.
    fn supports(&self, format: ImageFormat) -> bool {
        matches!(format, ImageFormat::Png | ImageFormat::Jpg)
    }

    /// Compress `data`, returning the new bytes.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError>;
}

/// Result of [`compress_or_original`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOutcome {
    /// Bytes to write.
    pub bytes: Vec<u8>,
    /// Whether `bytes` came from the compressor.
    pub compressed: bool,
}

impl CompressOutcome {
    fn original(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            compressed: false,
        }
    }
}

/// Compress `bytes` if possible, otherwise keep them unchanged.
///
/// The compressor is only consulted when it supports `format` and the bytes
/// carry that format's signature.
pub fn compress_or_original(
    bytes: Vec<u8>,
    compressor: Option<&dyn Compressor>,
    format: ImageFormat,
) -> CompressOutcome {
    let Some(compressor) = compressor else {
        return CompressOutcome::original(bytes);
    };
    if !compressor.supports(format) {
        debug!(compressor = compressor.name(), %format, "Format not supported, keeping original");
        return CompressOutcome::original(bytes);
    }
    if !format.matches_magic(&bytes) {
        warn!(compressor = compressor.name(), %format, "Content does not look like {format}, keeping original");
        return CompressOutcome::original(bytes);
    }

    match compressor.compress(&bytes) {
        Ok(smaller) if smaller.len() < bytes.len() => {
            debug!(
                compressor = compressor.name(),
                before = bytes.len(),
                after = smaller.len(),
                "Compressed"
            );
            CompressOutcome {
                bytes: smaller,
                compressed: true,
            }
        }
        Ok(_) => {
            debug!(compressor = compressor.name(), "Compressed output not smaller, keeping original");
            CompressOutcome::original(bytes)
        }
        Err(e) => {
            warn!(compressor = compressor.name(), error = %e, "Compression failed, keeping original");
            CompressOutcome::original(bytes)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShrinkResponse {
    output: Option<ShrinkOutput>,
}

#[derive(Debug, Deserialize)]
struct ShrinkOutput {
    url: Option<String>,
}

/// Compressor backed by the Tinify (TinyPNG) API.
pub struct TinifyCompressor<T> {
    http: RetryingClient<T>,
    api_key: String,
    shrink_url: String,
    policy: RetryPolicy,
}

impl<T: Transport> TinifyCompressor<T> {
    /// Create a compressor using `api_key`.
    pub fn new(transport: T, api_key: impl Into<String>) -> Self {
        Self {
            http: RetryingClient::new(transport),
            api_key: api_key.into(),
            shrink_url: TINIFY_SHRINK_URL.to_owned(),
            policy: RetryPolicy::download(),
        }
    }

    /// Use a different shrink endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.shrink_url = url.into();
        self
    }

    /// Use a different retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn authorization(&self) -> String {
        let credentials = BASE64_STANDARD.encode(format!("api:{}", self.api_key));
        format!("Basic {credentials}")
    }
}

impl<T: Transport> Compressor for TinifyCompressor<T> {
    fn name(&self) -> &str {
        "tinify"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
        let request = HttpRequest::post(&self.shrink_url, data.to_vec())
            .header("Authorization", self.authorization())
            .timeout(COMPRESS_TIMEOUT);
        let response = self.http.send(&request, &self.policy)?;

        if response.status() != 201 {
            return Err(response.into_error().into());
        }
        if let Some(count) = response.header("compression-count") {
            info!(count, "Tinify compressions used this month");
        }

        let body: ShrinkResponse = response.into_json()?;
        let url = body
            .output
            .and_then(|output| output.url)
            .ok_or(CompressError::MissingOutput)?;

        let response = self
            .http
            .send(&HttpRequest::get(url).timeout(COMPRESS_TIMEOUT), &self.policy)?;
        if !response.is_success() {
            return Err(response.into_error().into());
        }
        Ok(response.into_bytes()?)
    }
}

/// Compressor that posts raw bytes to a compression relay.
pub struct RelayCompressor<T> {
    http: RetryingClient<T>,
    url: String,
    policy: RetryPolicy,
}

impl<T: Transport> RelayCompressor<T> {
    /// Create a compressor posting to `url`.
    pub fn new(transport: T, url: impl Into<String>) -> Self {
        Self {
            http: RetryingClient::new(transport),
            url: url.into(),
            policy: RetryPolicy::download(),
        }
    }

    /// Use a different retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl<T: Transport> Compressor for RelayCompressor<T> {
    fn name(&self) -> &str {
        "relay"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
        let request = HttpRequest::post(&self.url, data.to_vec())
            .header("Content-Type", "application/octet-stream")
            .timeout(COMPRESS_TIMEOUT);
        let response = self.http.send(&request, &self.policy)?;

        if response.status() != 200 {
            return Err(response.into_error().into());
        }
        Ok(response.into_bytes()?)
    }
}
