//! Image-list mode: render specific nodes to chosen files.
//!
//! Instead of walking a document, each Figma URL names one node that is
//! rendered to `{id}@{scale}x.{ext}` in the output directory (`1:2` becomes
//! `1_2@3x.png`), or to an explicit path for the first image.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::format::ImageFormat;
use crate::paths::{sanitize_component, sanitize_node_id};
use crate::selector::ExportCandidate;
use crate::source::FileSource;

/// One node and the file it is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTarget {
    /// Figma file key.
    pub file_key: String,
    /// API node id.
    pub node_id: String,
    /// Destination file.
    pub path: PathBuf,
}

impl ImageTarget {
    /// The target as a render candidate. The file key stands in for the
    /// node name, which is never fetched in this mode.
    pub(crate) fn candidate(&self) -> ExportCandidate {
        ExportCandidate {
            node_id: self.node_id.clone(),
            display_name: self.file_key.clone(),
            page_name: String::new(),
        }
    }
}

/// File name for a rendered node: `1:2` at scale 3 as PNG is `1_2@3x.png`.
pub fn image_file_name(node_id: &str, scale: f64, format: ImageFormat) -> String {
    format!(
        "{}@{scale}x.{}",
        sanitize_component(&sanitize_node_id(node_id)),
        format.extension()
    )
}

/// Build one target per source.
///
/// Sources without a node id are skipped, as are repeats of a file key and
/// node id seen earlier. The first target is written to `output` when one
/// is given; every other target gets [`image_file_name`] under `output_dir`.
/// When the same node id appears in two files, the later one's name is
/// prefixed with its file key.
pub fn image_targets(
    sources: &[FileSource],
    output_dir: &Path,
    output: Option<&Path>,
    scale: f64,
    format: ImageFormat,
) -> Vec<ImageTarget> {
    let mut seen = HashSet::new();
    let mut issued = HashSet::new();
    let mut targets: Vec<ImageTarget> = Vec::with_capacity(sources.len());

    for source in sources {
        let Some(node_id) = &source.node_id else {
            warn!(file_key = %source.file_key, "No node id in source, skipping");
            continue;
        };
        if !seen.insert((source.file_key.as_str(), node_id.as_str())) {
            warn!(file_key = %source.file_key, node_id = %node_id, "Duplicate node, skipping");
            continue;
        }

        let name = image_file_name(node_id, scale, format);
        let mut path = match output {
            Some(path) if targets.is_empty() => path.to_path_buf(),
            _ => output_dir.join(&name),
        };
        if !issued.insert(path.clone()) {
            path = output_dir.join(format!("{}_{name}", source.file_key));
            issued.insert(path.clone());
        }
        targets.push(ImageTarget {
            file_key: source.file_key.clone(),
            node_id: node_id.clone(),
            path,
        });
    }

    targets
}
