//! Export orchestration.
//!
//! A run fetches the document, selects candidates, then walks the render
//! batches. Each batch's URLs are downloaded before the next batch is
//! requested. Per-node problems are recorded in the [`RunSummary`]; only
//! document fetch failures and unrecoverable batch failures end the run.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::batcher::{ExportBatcher, RenderOutcome};
use crate::client::FigmaClient;
use crate::compress::Compressor;
use crate::config::ExportConfig;
use crate::document::{DocumentNode, FileResponse};
use crate::download::AssetDownloader;
use crate::error::ExportError;
use crate::format::ImageFormat;
use crate::http::{RetryingClient, Transport};
use crate::images::ImageTarget;
use crate::paths::{PathAllocator, ResolvedPath};
use crate::selector::{ExportCandidate, select_scoped, select_top_level};
use crate::source::FileSource;

/// Outcome for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportResult {
    /// The asset was written to `path`.
    Downloaded {
        path: PathBuf,
        bytes_written: u64,
        compressed: bool,
    },
    /// The render service had no image for the node.
    SkippedNoUrl,
    /// Rendering or downloading failed.
    Failed(String),
}

/// A candidate and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateResult {
    pub candidate: ExportCandidate,
    pub result: ExportResult,
}

/// Tally of an export run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Candidates processed.
    pub attempted: usize,
    /// Files written.
    pub succeeded: usize,
    /// Candidates without a render URL.
    pub skipped: usize,
    /// Candidates whose render or download failed.
    pub failed: usize,
    /// Per-candidate results in processing order.
    pub results: Vec<CandidateResult>,
}

impl RunSummary {
    fn record(&mut self, candidate: &ExportCandidate, result: ExportResult) {
        self.attempted += 1;
        match result {
            ExportResult::Downloaded { .. } => self.succeeded += 1,
            ExportResult::SkippedNoUrl => self.skipped += 1,
            ExportResult::Failed(_) => self.failed += 1,
        }
        self.results.push(CandidateResult {
            candidate: candidate.clone(),
            result,
        });
    }

    /// Whether the run counts as successful: nothing to do, or at least one
    /// file written.
    pub fn is_success(&self) -> bool {
        self.attempted == 0 || self.succeeded > 0
    }

    /// Total bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match r.result {
                ExportResult::Downloaded { bytes_written, .. } => bytes_written,
                _ => 0,
            })
            .sum()
    }
}

/// A candidate and the path it would be written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAsset {
    pub candidate: ExportCandidate,
    pub path: ResolvedPath,
}

/// Runs exports against the Figma API.
pub struct Pipeline<T> {
    config: ExportConfig,
    token: String,
    http: RetryingClient<T>,
    compressor: Option<Box<dyn Compressor>>,
}

impl<T: Transport> Pipeline<T> {
    /// Create a pipeline authenticating with `token`.
    pub fn new(config: ExportConfig, token: impl Into<String>, transport: T) -> Self {
        Self {
            config,
            token: token.into(),
            http: RetryingClient::new(transport),
            compressor: None,
        }
    }

    /// Compress downloaded images with `compressor`.
    #[must_use]
    pub fn with_compressor(mut self, compressor: Box<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Run settings.
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Export every candidate of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] for invalid settings, a failed document fetch,
    /// an unknown scoped node, or a render batch that cannot be recovered.
    /// Individual download failures are reported in the summary instead.
    pub fn run(&self, source: &FileSource) -> Result<RunSummary, ExportError> {
        self.config.validate()?;
        let file = self.fetch_document(&source.file_key)?;
        let candidates = self.select(&file.document, source)?;

        let mut summary = RunSummary::default();
        if candidates.is_empty() {
            info!(file_key = %source.file_key, "No exportable nodes found");
            return Ok(summary);
        }

        let config = &self.config;
        let compress = config.compress && self.compressor.is_some();
        if config.compress && self.compressor.is_none() {
            info!("No compressor configured, images are written as rendered");
        }
        info!(
            count = candidates.len(),
            output = %config.output_dir.display(),
            batch_size = config.batch_size,
            "Exporting nodes"
        );

        let client = FigmaClient::new(&self.http, &self.token, config);
        let mut batcher = ExportBatcher::new(client, config.batch_size, config.batch_delay);
        let delivery = self.delivery(compress);
        let mut allocator = PathAllocator::new(&config.output_dir, config.format);

        let rendered = batcher.export_with(
            &source.file_key,
            &candidates,
            config.scale,
            config.format,
            |candidate, outcome| {
                let result =
                    delivery.deliver(candidate, outcome, || allocator.allocate(candidate).absolute);
                summary.record(candidate, result);
            },
        );
        if let Err(err) = rendered {
            warn!(
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                skipped = summary.skipped,
                failed = summary.failed,
                error = %err,
                "Export aborted, files already written are kept"
            );
            return Err(err);
        }

        log_finished(&summary);
        Ok(summary)
    }

    /// Render each target node to its own file.
    ///
    /// Consecutive targets of the same file share render batches. A render
    /// failure that would abort [`run`](Self::run) only fails the remaining
    /// targets of that file; the next file is still exported.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Config`] for invalid settings.
    pub fn run_images(&self, targets: &[ImageTarget]) -> Result<RunSummary, ExportError> {
        self.config.validate()?;
        let config = &self.config;
        let delivery = self.delivery(config.compress && self.compressor.is_some());
        let mut summary = RunSummary::default();

        for group in targets.chunk_by(|a, b| a.file_key == b.file_key) {
            let file_key = &group[0].file_key;
            let candidates: Vec<ExportCandidate> =
                group.iter().map(ImageTarget::candidate).collect();
            info!(file_key = %file_key, count = candidates.len(), "Exporting images");

            let client = FigmaClient::new(&self.http, &self.token, config);
            let mut batcher = ExportBatcher::new(client, config.batch_size, config.batch_delay);
            let mut delivered = 0;
            let rendered = batcher.export_with(
                file_key,
                &candidates,
                config.scale,
                config.format,
                |candidate, outcome| {
                    let destination = &group[delivered].path;
                    delivered += 1;
                    let result = delivery.deliver(candidate, outcome, || destination.clone());
                    summary.record(candidate, result);
                },
            );

            if let Err(err) = rendered {
                warn!(
                    file_key = %file_key,
                    error = %err,
                    remaining = candidates.len() - delivered,
                    "Render failed, skipping the rest of this file"
                );
                for candidate in &candidates[delivered..] {
                    summary.record(candidate, ExportResult::Failed(err.to_string()));
                }
            }
        }

        log_finished(&summary);
        Ok(summary)
    }

    fn delivery(&self, compress: bool) -> Delivery<'_, T> {
        let config = &self.config;
        Delivery {
            downloader: AssetDownloader::new(&self.http, &config.download_retry, config.request_timeout)
                .with_compressor(self.compressor.as_deref()),
            format: config.format,
            compress,
        }
    }

    /// Resolve output paths for `source` without rendering anything.
    ///
    /// Paths are allocated for every candidate, so they match a real run only
    /// when every node renders.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run) up to candidate selection.
    pub fn plan(&self, source: &FileSource) -> Result<Vec<PlannedAsset>, ExportError> {
        self.config.validate()?;
        let file = self.fetch_document(&source.file_key)?;
        let candidates = self.select(&file.document, source)?;

        let mut allocator = PathAllocator::new(&self.config.output_dir, self.config.format);
        Ok(candidates
            .into_iter()
            .map(|candidate| PlannedAsset {
                path: allocator.allocate(&candidate),
                candidate,
            })
            .collect())
    }

    fn fetch_document(&self, file_key: &str) -> Result<FileResponse, ExportError> {
        info!(file_key, "Fetching document");
        let client = FigmaClient::new(&self.http, &self.token, &self.config);
        let file = client
            .get_file(file_key)
            .map_err(|source| ExportError::Document {
                file_key: file_key.to_owned(),
                source,
            })?;
        if let Some(name) = &file.name {
            info!(file_key, name = %name, "Fetched document");
        }
        Ok(file)
    }

    fn select(
        &self,
        document: &DocumentNode,
        source: &FileSource,
    ) -> Result<Vec<ExportCandidate>, ExportError> {
        match &source.node_id {
            Some(node_id) => select_scoped(document, node_id)
                .ok_or_else(|| ExportError::NodeNotFound(node_id.clone())),
            None => Ok(select_top_level(document)),
        }
    }
}

/// Downloads rendered URLs and turns render outcomes into results.
struct Delivery<'a, T> {
    downloader: AssetDownloader<'a, T>,
    format: ImageFormat,
    compress: bool,
}

impl<T: Transport> Delivery<'_, T> {
    /// `destination` is only called for nodes that rendered, so skipped and
    /// failed nodes do not take a path.
    fn deliver(
        &self,
        candidate: &ExportCandidate,
        outcome: RenderOutcome,
        destination: impl FnOnce() -> PathBuf,
    ) -> ExportResult {
        let url = match outcome {
            RenderOutcome::Url(url) => url,
            RenderOutcome::NoUrl => return ExportResult::SkippedNoUrl,
            RenderOutcome::Failed(reason) => return ExportResult::Failed(reason),
        };

        let path = destination();
        match self
            .downloader
            .fetch_and_place(&url, &path, self.format, self.compress)
        {
            Ok(placed) => {
                info!(
                    path = %path.display(),
                    bytes = placed.bytes_written,
                    compressed = placed.compressed,
                    "Saved"
                );
                ExportResult::Downloaded {
                    path,
                    bytes_written: placed.bytes_written,
                    compressed: placed.compressed,
                }
            }
            Err(e) => {
                warn!(
                    node_id = %candidate.node_id,
                    name = %candidate.display_name,
                    error = %e,
                    "Download failed"
                );
                ExportResult::Failed(e.to_string())
            }
        }
    }
}

fn log_finished(summary: &RunSummary) {
    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        "Export finished"
    );
}
