//! `figdl export` command implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};
use figdl_config::{CliSettings, CompressionBackend, Config, Credentials, EnvSources, TINIFY_KEY_VAR};
use figdl_export::{
    Compressor, ExportConfig, ExportResult, FileSource, ImageFormat, ImageTarget, Pipeline,
    PlannedAsset, RelayCompressor, RetryPolicy, RunSummary, TinifyCompressor, UreqTransport,
    image_targets, parse_url_list,
};

use crate::error::CliError;
use crate::output::Output;

/// Compression backend selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CompressorArg {
    /// Tinify (TinyPNG) API.
    Tinify,
    /// Local compression relay.
    Relay,
}

impl From<CompressorArg> for CompressionBackend {
    fn from(arg: CompressorArg) -> Self {
        match arg {
            CompressorArg::Tinify => Self::Tinify,
            CompressorArg::Relay => Self::Relay,
        }
    }
}

/// What a run renders.
#[derive(Debug, PartialEq)]
enum Selection {
    /// Every exportable frame in a file, or under one node.
    Tree(FileSource),
    /// One image per node, named after the node.
    Images(Vec<FileSource>),
}

/// Arguments for the export command.
#[derive(Args)]
pub(crate) struct ExportArgs {
    /// Figma file URL or file key.
    source: Option<String>,

    /// Figma file key (alternative to a URL).
    #[arg(short = 'k', long, conflicts_with = "source")]
    file_key: Option<String>,

    /// Export only this node (page or frame id, `1:2` or `1-2`).
    #[arg(long)]
    node_id: Option<String>,

    /// Render the nodes named by these Figma URLs instead of walking a file.
    #[arg(long, num_args = 1.., conflicts_with_all = ["source", "file_key", "node_id"])]
    urls: Vec<String>,

    /// Read node URLs from a file, one per line (`#` starts a comment).
    #[arg(long, conflicts_with_all = ["source", "file_key", "node_id"])]
    urls_file: Option<PathBuf>,

    /// Write the first rendered node to this path.
    #[arg(long = "output", value_name = "PATH")]
    output_file: Option<PathBuf>,

    /// Output directory (overrides config).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Render scale, 0.01 to 4 (overrides config).
    #[arg(short, long)]
    scale: Option<f64>,

    /// Image format: png, jpg, svg or pdf (overrides config).
    #[arg(short, long)]
    format: Option<String>,

    /// Nodes per render request (overrides config).
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Write images exactly as rendered.
    #[arg(long)]
    no_compress: bool,

    /// Compression backend (overrides config).
    #[arg(long, value_enum)]
    compressor: Option<CompressorArg>,

    /// Compression relay URL (overrides config).
    #[arg(long)]
    relay_url: Option<String>,

    /// Env file to read tokens from before ./.env.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Figma access token.
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Tinify API key.
    #[arg(long)]
    tinify_key: Option<String>,

    /// Path to configuration file (default: auto-discover figdl.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List the files that would be written without rendering anything.
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    pub(crate) verbose: bool,
}

impl ExportArgs {
    /// Execute the export command.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid input, a fatal export failure, or when no
    /// asset could be written.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        // Parse sources before touching config or network
        let selection = self.selection(&output)?;

        let config = Config::load(self.config.as_deref(), Some(&self.cli_settings()))?;
        let cwd = std::env::current_dir()?;
        let sources = EnvSources::load(self.env_file.as_deref(), &cwd)?;
        let credentials =
            Credentials::resolve(self.token.as_deref(), self.tinify_key.as_deref(), &sources);
        tracing::debug!(?credentials, "Resolved credentials");
        let token = credentials.require_figma_token()?;

        let export_config = export_config(&config)?;
        let transport = UreqTransport::new(export_config.request_timeout);
        let mut pipeline = Pipeline::new(export_config, token, transport);
        if config.export_resolved.compress
            && let Some(compressor) = compressor(&config, &credentials, &output)
        {
            pipeline = pipeline.with_compressor(compressor);
        }

        let root = pipeline.config().output_dir.clone();
        let summary = match selection {
            Selection::Tree(source) => {
                output.highlight(&format!(
                    "Exporting {} -> {}",
                    describe(&source),
                    root.display()
                ));
                if self.dry_run {
                    let plan = pipeline.plan(&source)?;
                    print_plan(&output, &plan, &root);
                    return Ok(());
                }
                pipeline.run(&source)?
            }
            Selection::Images(sources) => {
                let settings = pipeline.config();
                let targets = image_targets(
                    &sources,
                    &root,
                    self.output_file.as_deref(),
                    settings.scale,
                    settings.format,
                );
                if targets.is_empty() {
                    return Err(CliError::Validation(
                        "no URL names a node (add ?node-id=... to the URL)".to_owned(),
                    ));
                }
                output.highlight(&format!(
                    "Exporting {} image(s) -> {}",
                    targets.len(),
                    root.display()
                ));
                if self.dry_run {
                    print_targets(&output, &targets, &root);
                    return Ok(());
                }
                pipeline.run_images(&targets)?
            }
        };

        tracing::debug!(bytes = summary.bytes_written(), "Bytes written");
        print_summary(&output, &summary, &root);

        if !summary.is_success() {
            return Err(CliError::Validation(format!(
                "no assets exported ({} attempted)",
                summary.attempted
            )));
        }
        Ok(())
    }

    /// Decide between walking one file and rendering a list of nodes.
    ///
    /// `--urls` and `--urls-file` select the node list; lines and URLs that
    /// cannot be used are reported and skipped. A single source with
    /// `--output` is a one-image list.
    fn selection(&self, output: &Output) -> Result<Selection, CliError> {
        if self.urls.is_empty() && self.urls_file.is_none() {
            let source = self.file_source()?;
            if self.output_file.is_none() {
                return Ok(Selection::Tree(source));
            }
            if source.node_id.is_none() {
                return Err(CliError::Validation(
                    "--output needs a node id (URL with ?node-id=... or --node-id)".to_owned(),
                ));
            }
            return Ok(Selection::Images(vec![source]));
        }

        let mut urls = self.urls.clone();
        if let Some(path) = &self.urls_file {
            let content = std::fs::read_to_string(path)?;
            let list = parse_url_list(&content);
            for (line, text) in &list.rejected {
                output.warning(&format!(
                    "{}:{line}: not a URL, skipping: {text}",
                    path.display()
                ));
            }
            urls.extend(list.urls);
        }

        let mut sources = Vec::with_capacity(urls.len());
        for url in &urls {
            match FileSource::parse(url) {
                Ok(source) if source.node_id.is_none() => {
                    output.warning(&format!("No node-id in {url}, skipping"));
                }
                Ok(source) => sources.push(source),
                Err(err) => output.warning(&format!("{err}, skipping")),
            }
        }
        if sources.is_empty() {
            return Err(CliError::Validation("no usable Figma URLs given".to_owned()));
        }
        Ok(Selection::Images(sources))
    }

    fn file_source(&self) -> Result<FileSource, CliError> {
        let input = self
            .source
            .as_deref()
            .or(self.file_key.as_deref())
            .ok_or_else(|| {
                CliError::Validation("a Figma URL or --file-key is required".to_owned())
            })?;
        let source = FileSource::parse(input)?;
        Ok(match &self.node_id {
            Some(node_id) => source.with_node(node_id),
            None => source,
        })
    }

    fn cli_settings(&self) -> CliSettings {
        CliSettings {
            output_dir: self.output_dir.clone(),
            scale: self.scale,
            format: self.format.clone(),
            batch_size: self.batch_size,
            compress: self.no_compress.then_some(false),
            backend: self.compressor.map(Into::into),
            relay_url: self.relay_url.clone(),
        }
    }
}

/// Build pipeline settings from the loaded configuration.
fn export_config(config: &Config) -> Result<ExportConfig, CliError> {
    let export = &config.export_resolved;
    let format: ImageFormat = export.format.parse()?;
    let base_delay = Duration::from_millis(config.retry.base_delay_ms);
    let attempts = config.retry.max_attempts;

    let export_config = ExportConfig {
        api_base_url: config.api.base_url.clone(),
        output_dir: export.output_dir.clone(),
        scale: export.scale,
        format,
        batch_size: export.batch_size,
        batch_delay: Duration::from_millis(export.batch_delay_ms),
        compress: export.compress,
        document_retry: RetryPolicy::document()
            .with_max_attempts(config.retry.document_max_attempts)
            .with_base_delay(base_delay),
        render_retry: RetryPolicy::render()
            .with_max_attempts(attempts)
            .with_base_delay(base_delay),
        download_retry: RetryPolicy::download()
            .with_max_attempts(attempts)
            .with_base_delay(base_delay),
        request_timeout: Duration::from_secs(config.api.timeout_secs),
        document_timeout: Duration::from_secs(config.api.document_timeout_secs),
    };
    export_config.validate()?;
    Ok(export_config)
}

/// Build the configured compressor, or `None` when it cannot be used.
fn compressor(
    config: &Config,
    credentials: &Credentials,
    output: &Output,
) -> Option<Box<dyn Compressor>> {
    let timeout = Duration::from_secs(config.api.timeout_secs);
    let retry = RetryPolicy::download()
        .with_max_attempts(config.retry.max_attempts)
        .with_base_delay(Duration::from_millis(config.retry.base_delay_ms));

    match config.compression.backend {
        CompressionBackend::Tinify => {
            let Some(key) = &credentials.tinify_key else {
                output.warning(&format!(
                    "{TINIFY_KEY_VAR} not set, images will be saved uncompressed"
                ));
                return None;
            };
            let compressor = TinifyCompressor::new(UreqTransport::new(timeout), key.clone())
                .with_url(&config.compression.tinify_url)
                .with_retry(retry);
            Some(Box::new(compressor))
        }
        CompressionBackend::Relay => {
            let compressor =
                RelayCompressor::new(UreqTransport::new(timeout), &config.compression.relay_url)
                    .with_retry(retry);
            Some(Box::new(compressor))
        }
    }
}

fn describe(source: &FileSource) -> String {
    match &source.node_id {
        Some(node_id) => format!("{} (node {node_id})", source.file_key),
        None => source.file_key.clone(),
    }
}

fn relative<'a>(path: &'a Path, root: &Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

fn print_plan(output: &Output, plan: &[PlannedAsset], root: &Path) {
    output.highlight(&format!(
        "\n[DRY RUN] {} asset(s) would be exported:",
        plan.len()
    ));
    for asset in plan {
        output.item(
            &asset.path.relative.display().to_string(),
            &format!("({})", asset.candidate.node_id),
        );
    }
    if plan.is_empty() {
        output.warning("No exportable frames or components found.");
    } else {
        output.info(&format!("\nOutput root: {}", root.display()));
    }
}

fn print_targets(output: &Output, targets: &[ImageTarget], root: &Path) {
    output.highlight(&format!(
        "\n[DRY RUN] {} image(s) would be exported:",
        targets.len()
    ));
    for target in targets {
        output.item(
            &relative(&target.path, root).display().to_string(),
            &format!("({} {})", target.file_key, target.node_id),
        );
    }
}

fn print_summary(output: &Output, summary: &RunSummary, root: &Path) {
    for entry in &summary.results {
        let candidate = &entry.candidate;
        match &entry.result {
            ExportResult::Downloaded {
                path,
                bytes_written,
                compressed,
            } => {
                let detail = if *compressed {
                    format!("{bytes_written} bytes, compressed")
                } else {
                    format!("{bytes_written} bytes")
                };
                output.item(&relative(path, root).display().to_string(), &detail);
            }
            ExportResult::SkippedNoUrl => output.warning(&format!(
                "  skipped {} ({}): nothing to render",
                candidate.display_name, candidate.node_id
            )),
            ExportResult::Failed(reason) => output.error(&format!(
                "  failed {} ({}): {reason}",
                candidate.display_name, candidate.node_id
            )),
        }
    }

    let tally = format!(
        "\nExported {}/{} ({} skipped, {} failed)",
        summary.succeeded, summary.attempted, summary.skipped, summary.failed
    );
    if summary.attempted == 0 {
        output.warning("No exportable frames or components found.");
    } else if summary.failed == 0 && summary.skipped == 0 {
        output.success(&tally);
    } else {
        output.warning(&tally);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ExportArgs,
    }

    fn parse(args: &[&str]) -> ExportArgs {
        TestCli::try_parse_from(std::iter::once("figdl").chain(args.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn test_source_from_url_with_node_override() {
        let args = parse(&[
            "https://www.figma.com/design/KEY123/App?node-id=1-2",
            "--node-id",
            "3-4",
        ]);
        let source = args.file_source().unwrap();
        assert_eq!(source.file_key, "KEY123");
        assert_eq!(source.node_id.as_deref(), Some("3:4"));
    }

    #[test]
    fn test_source_from_file_key_flag() {
        let source = parse(&["-k", "KEY123"]).file_source().unwrap();
        assert_eq!(source, FileSource::new("KEY123"));
    }

    #[test]
    fn test_missing_source_is_error() {
        assert!(matches!(
            parse(&[]).file_source(),
            Err(CliError::Validation(_))
        ));
        assert!(matches!(
            parse(&["https://example.com/nothing"]).file_source(),
            Err(CliError::Source(_))
        ));
    }

    #[test]
    fn test_plain_source_walks_the_file() {
        let selection = parse(&["KEY123"]).selection(&Output::new()).unwrap();
        assert_eq!(selection, Selection::Tree(FileSource::new("KEY123")));
    }

    #[test]
    fn test_output_path_renders_single_node() {
        let args = parse(&[
            "https://www.figma.com/design/KEY123/App?node-id=1-2",
            "--output",
            "hero.png",
        ]);
        assert_eq!(
            args.selection(&Output::new()).unwrap(),
            Selection::Images(vec![FileSource::new("KEY123").with_node("1:2")])
        );

        let args = parse(&["KEY123", "--output", "hero.png"]);
        assert!(matches!(
            args.selection(&Output::new()),
            Err(CliError::Validation(_))
        ));
    }

    #[test]
    fn test_urls_flag_skips_unusable_entries() {
        let args = parse(&[
            "--urls",
            "https://www.figma.com/design/AAA/App?node-id=1-2",
            "https://www.figma.com/file/BBB/Other",
            "https://example.com/nothing",
            "https://www.figma.com/design/CCC/Third?node-id=5-6",
        ]);
        assert_eq!(
            args.selection(&Output::new()).unwrap(),
            Selection::Images(vec![
                FileSource::new("AAA").with_node("1:2"),
                FileSource::new("CCC").with_node("5:6"),
            ])
        );
    }

    #[test]
    fn test_urls_file_appends_to_urls_flag() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(
            &list,
            "# screens\n\
             https://www.figma.com/design/BBB/App?node-id=3-4\n\
             figma.com/design/CCC/App?node-id=5-6\n",
        )
        .unwrap();

        let args = parse(&[
            "--urls",
            "https://www.figma.com/design/AAA/App?node-id=1-2",
            "--urls-file",
            list.to_str().unwrap(),
        ]);
        assert_eq!(
            args.selection(&Output::new()).unwrap(),
            Selection::Images(vec![
                FileSource::new("AAA").with_node("1:2"),
                FileSource::new("BBB").with_node("3:4"),
            ])
        );
    }

    #[test]
    fn test_url_list_without_nodes_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(&list, "# nothing yet\n\nhttps://www.figma.com/file/KEY/App\n").unwrap();

        let args = parse(&["--urls-file", list.to_str().unwrap()]);
        assert!(matches!(
            args.selection(&Output::new()),
            Err(CliError::Validation(_))
        ));
    }

    #[test]
    fn test_urls_conflict_with_source() {
        let result = TestCli::try_parse_from(["figdl", "KEY", "--urls", "https://x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_settings_from_flags() {
        let args = parse(&[
            "KEY",
            "-o",
            "out",
            "-s",
            "2",
            "-f",
            "jpg",
            "-b",
            "1",
            "--no-compress",
            "--compressor",
            "relay",
        ]);
        let settings = args.cli_settings();
        assert_eq!(settings.output_dir, Some(PathBuf::from("out")));
        assert_eq!(settings.scale, Some(2.0));
        assert_eq!(settings.format.as_deref(), Some("jpg"));
        assert_eq!(settings.batch_size, Some(1));
        assert_eq!(settings.compress, Some(false));
        assert_eq!(settings.backend, Some(CompressionBackend::Relay));
    }

    #[test]
    fn test_compress_not_overridden_without_flag() {
        assert_eq!(parse(&["KEY"]).cli_settings().compress, None);
    }

    #[test]
    fn test_export_config_from_defaults() {
        let export = export_config(&Config::default()).unwrap();
        assert_eq!(export.format, ImageFormat::Png);
        assert_eq!(export.batch_size, 5);
        assert_eq!(export.document_retry.max_attempts, 4);
        assert_eq!(export.render_retry.max_attempts, 3);
        assert_eq!(export.render_retry.retry_statuses, vec![429, 500]);
        assert_eq!(export.render_retry.base_delay, Duration::from_secs(10));
        assert_eq!(export.document_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative(Path::new("/out/Flows/a.png"), Path::new("/out")),
            Path::new("Flows/a.png")
        );
        assert_eq!(
            relative(Path::new("/elsewhere/a.png"), Path::new("/out")),
            Path::new("/elsewhere/a.png")
        );
    }
}
