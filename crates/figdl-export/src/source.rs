//! Figma file key and node id parsing.
//!
//! Accepts either a bare file key or a Figma URL such as
//! `https://www.figma.com/design/<key>/<title>?node-id=618-21942`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::SourceError;

static FILE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

static FILE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"figma\.com/(?:design|file)/([A-Za-z0-9_-]+)").unwrap());

static NODE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]node-id=([^&#]+)").unwrap());

/// A Figma file to export from, optionally scoped to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    /// File key (the path segment after `/design/` or `/file/`).
    pub file_key: String,
    /// API node id (`618:21942`), if the URL pointed at a node.
    pub node_id: Option<String>,
}

impl FileSource {
    /// Create a source for a whole file.
    pub fn new(file_key: impl Into<String>) -> Self {
        Self {
            file_key: file_key.into(),
            node_id: None,
        }
    }

    /// Scope the source to one node.
    #[must_use]
    pub fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(normalize_node_id(node_id));
        self
    }

    /// Parse a Figma URL or bare file key.
    pub fn parse(input: &str) -> Result<Self, SourceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SourceError::Empty);
        }

        if FILE_KEY_RE.is_match(input) {
            return Ok(Self::new(input));
        }

        let file_key = FILE_URL_RE
            .captures(input)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| SourceError::Unrecognized(input.to_owned()))?
            .as_str();

        let node_id = NODE_ID_RE
            .captures(input)
            .and_then(|caps| caps.get(1))
            .map(|m| normalize_node_id(m.as_str()))
            .filter(|id| !id.is_empty());

        Ok(Self {
            file_key: file_key.to_owned(),
            node_id,
        })
    }
}

/// Entries read from a URL list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UrlList {
    /// Accepted URLs, in file order.
    pub urls: Vec<String>,
    /// Lines that are not URLs, with their 1-based line numbers.
    pub rejected: Vec<(usize, String)>,
}

/// Parse a URL list: one URL per line, blank lines and `#` comments ignored.
///
/// Lines that do not start with `http` are collected in
/// [`UrlList::rejected`] so the caller can report them.
pub fn parse_url_list(content: &str) -> UrlList {
    let mut list = UrlList::default();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("http") {
            list.urls.push(line.to_owned());
        } else {
            list.rejected.push((index + 1, line.to_owned()));
        }
    }
    list
}

/// Convert a URL node id (`618-21942`, `618%3A21942`) to API form (`618:21942`).
pub fn normalize_node_id(raw: &str) -> String {
    raw.trim()
        .replace("%3A", ":")
        .replace("%3a", ":")
        .replace('-', ":")
}
