//! Export run settings.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ExportError;
use crate::format::ImageFormat;
use crate::http::RetryPolicy;

/// Default Figma REST API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.figma.com/v1";

/// Default number of nodes per render request.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default render scale.
pub const DEFAULT_SCALE: f64 = 3.0;

/// Scale range accepted by the render API.
pub const SCALE_RANGE: (f64, f64) = (0.01, 4.0);

/// Settings for one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// API base URL (no trailing slash needed).
    pub api_base_url: String,
    /// Root directory for exported files.
    pub output_dir: PathBuf,
    /// Render scale (0.01 to 4).
    pub scale: f64,
    /// Output image format.
    pub format: ImageFormat,
    /// Initial number of nodes per render request.
    pub batch_size: usize,
    /// Pause after each successful render request.
    pub batch_delay: Duration,
    /// Whether to run downloaded images through the compressor.
    pub compress: bool,
    /// Retry policy for the document fetch.
    pub document_retry: RetryPolicy,
    /// Retry policy for render-URL requests.
    pub render_retry: RetryPolicy,
    /// Retry policy for asset downloads.
    pub download_retry: RetryPolicy,
    /// Timeout for render and download requests.
    pub request_timeout: Duration,
    /// Timeout for the document fetch (large files are slow).
    pub document_timeout: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            output_dir: PathBuf::from("./output"),
            scale: DEFAULT_SCALE,
            format: ImageFormat::Png,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_secs(5),
            compress: true,
            document_retry: RetryPolicy::document(),
            render_retry: RetryPolicy::render(),
            download_retry: RetryPolicy::download(),
            request_timeout: Duration::from_secs(120),
            document_timeout: Duration::from_secs(300),
        }
    }
}

impl ExportConfig {
    /// Check settings before any network activity.
    pub fn validate(&self) -> Result<(), ExportError> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(ExportError::Config(format!(
                "API base URL must start with http:// or https://, got '{}'",
                self.api_base_url
            )));
        }
        let (min, max) = SCALE_RANGE;
        if !(min..=max).contains(&self.scale) {
            return Err(ExportError::Config(format!(
                "scale must be between {min} and {max}, got {}",
                self.scale
            )));
        }
        if self.batch_size == 0 {
            return Err(ExportError::Config("batch size must be at least 1".to_owned()));
        }
        for (name, policy) in [
            ("document", &self.document_retry),
            ("render", &self.render_retry),
            ("download", &self.download_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(ExportError::Config(format!(
                    "{name} retry attempts must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Same settings with every pause and backoff set to zero.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.batch_delay = Duration::ZERO;
        for policy in [
            &mut self.document_retry,
            &mut self.render_retry,
            &mut self.download_retry,
        ] {
            policy.base_delay = Duration::ZERO;
        }
        self
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base_url.trim_end_matches('/'))
    }
}
