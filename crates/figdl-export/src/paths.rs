//! Output path allocation.
//!
//! Every candidate maps to `{root}/{page}/{name}_{id}.{ext}`, where page and
//! name are sanitized independently and `:` in the node id becomes `_`.
//! When that path was already issued in this run, a 1-based `_{n}` suffix is
//! appended before the extension, in first-seen order. The allocator never
//! issues the same path twice.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::format::ImageFormat;
use crate::selector::{DEFAULT_NODE_NAME, ExportCandidate};

/// Characters that are illegal in file names on at least one platform.
const RESERVED_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Make a page or node name safe to use as a single path component.
///
/// Reserved characters become `_`, surrounding whitespace is trimmed and an
/// empty result becomes `unnamed`. Names made only of dots are replaced so
/// they cannot refer to the current or parent directory.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = replaced.trim();

    if trimmed.is_empty() {
        return DEFAULT_NODE_NAME.to_owned();
    }
    if trimmed.chars().all(|c| c == '.') {
        return "_".repeat(trimmed.len());
    }
    trimmed.to_owned()
}

/// Make a node id safe for file names (`12:34` -> `12_34`).
pub fn sanitize_node_id(node_id: &str) -> String {
    node_id.replace(':', "_")
}

/// A candidate's output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Path relative to the output root (`page/file.ext`).
    pub relative: PathBuf,
    /// Path including the output root.
    pub absolute: PathBuf,
}

/// Allocates collision-free output paths for one export run.
#[derive(Debug)]
pub struct PathAllocator {
    root: PathBuf,
    extension: &'static str,
    occurrences: HashMap<String, usize>,
    issued: HashSet<PathBuf>,
}

impl PathAllocator {
    /// Create an allocator rooted at `root` for files of `format`.
    pub fn new(root: impl Into<PathBuf>, format: ImageFormat) -> Self {
        Self {
            root: root.into(),
            extension: format.extension(),
            occurrences: HashMap::new(),
            issued: HashSet::new(),
        }
    }

    /// Output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate the output path for `candidate`.
    ///
    /// Call once per candidate, in traversal order.
    pub fn allocate(&mut self, candidate: &ExportCandidate) -> ResolvedPath {
        let page = sanitize_component(&candidate.page_name);
        let name = sanitize_component(&candidate.display_name);
        let stem = format!("{name}_{}", sanitize_node_id(&candidate.node_id));
        let ext = self.extension;

        let seen = self.occurrences.entry(format!("{page}/{stem}")).or_insert(0);
        loop {
            let filename = if *seen == 0 {
                format!("{stem}.{ext}")
            } else {
                format!("{stem}_{seen}.{ext}")
            };
            *seen += 1;

            let relative = Path::new(&page).join(filename);
            if self.issued.insert(relative.clone()) {
                return ResolvedPath {
                    absolute: self.root.join(&relative),
                    relative,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, name: &str, page: &str) -> ExportCandidate {
        ExportCandidate {
            node_id: id.to_owned(),
            display_name: name.to_owned(),
            page_name: page.to_owned(),
        }
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Login / Sign up"), "Login _ Sign up");
        assert_eq!(sanitize_component(r#"a\b:c*d?e"f<g>h|i"#), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_component("   "), "unnamed");
        assert_eq!(sanitize_component(""), "unnamed");
        assert_eq!(sanitize_component("  Home  "), "Home");
        assert_eq!(sanitize_component(".."), "__");
        assert_eq!(sanitize_component(".hidden"), ".hidden");
    }

    #[test]
    fn test_sanitize_node_id() {
        assert_eq!(sanitize_node_id("618:21942"), "618_21942");
        assert_eq!(sanitize_node_id("I1:2;3:4"), "I1_2;3_4");
    }

    #[test]
    fn test_same_name_different_ids() {
        let mut allocator = PathAllocator::new("/out", ImageFormat::Png);
        let first = allocator.allocate(&candidate("1:2", "Login", "Flows"));
        let second = allocator.allocate(&candidate("1:3", "Login", "Flows"));

        assert_eq!(first.relative, PathBuf::from("Flows/Login_1_2.png"));
        assert_eq!(second.relative, PathBuf::from("Flows/Login_1_3.png"));
        assert_eq!(first.absolute, PathBuf::from("/out/Flows/Login_1_2.png"));
    }

    #[test]
    fn test_suffix_when_name_and_id_coincide() {
        let mut allocator = PathAllocator::new("/out", ImageFormat::Png);
        let first = allocator.allocate(&candidate("1:2", "Icon", "Page"));
        let second = allocator.allocate(&candidate("1_2", "Icon", "Page"));
        let third = allocator.allocate(&candidate("1:2", "Icon", "Page"));

        assert_eq!(first.relative, PathBuf::from("Page/Icon_1_2.png"));
        assert_eq!(second.relative, PathBuf::from("Page/Icon_1_2_1.png"));
        assert_eq!(third.relative, PathBuf::from("Page/Icon_1_2_2.png"));
    }

    #[test]
    fn test_names_that_sanitize_to_same_value() {
        let mut allocator = PathAllocator::new("/out", ImageFormat::Jpg);
        let first = allocator.allocate(&candidate("5:1", "a/b", "P"));
        let second = allocator.allocate(&candidate("5:1", "a:b", "P"));

        assert_eq!(first.relative, PathBuf::from("P/a_b_5_1.jpg"));
        assert_eq!(second.relative, PathBuf::from("P/a_b_5_1_1.jpg"));
    }

    #[test]
    fn test_suffix_never_reuses_an_issued_path() {
        let mut allocator = PathAllocator::new("/out", ImageFormat::Png);
        let a = allocator.allocate(&candidate("1", "x", "P"));
        let b = allocator.allocate(&candidate("1", "x", "P"));
        // "x_1" + id "1" naturally produces the path already issued to `b`.
        let c = allocator.allocate(&candidate("1", "x_1", "P"));

        assert_eq!(a.relative, PathBuf::from("P/x_1.png"));
        assert_eq!(b.relative, PathBuf::from("P/x_1_1.png"));
        assert_eq!(c.relative, PathBuf::from("P/x_1_1_1.png"));
    }

    #[test]
    fn test_many_duplicates_are_pairwise_distinct() {
        let mut allocator = PathAllocator::new("/out", ImageFormat::Png);
        let paths: Vec<PathBuf> = (0..20)
            .map(|_| allocator.allocate(&candidate("7:7", "Card", "Cards")).absolute)
            .collect();
        let unique: HashSet<&PathBuf> = paths.iter().collect();

        assert_eq!(unique.len(), paths.len());
        assert_eq!(paths[0], PathBuf::from("/out/Cards/Card_7_7.png"));
    }

    #[test]
    fn test_pages_are_independent() {
        let mut allocator = PathAllocator::new("/out", ImageFormat::Png);
        let a = allocator.allocate(&candidate("1:1", "Home", "iOS"));
        let b = allocator.allocate(&candidate("1:1", "Home", "Android"));

        assert_eq!(a.relative, PathBuf::from("iOS/Home_1_1.png"));
        assert_eq!(b.relative, PathBuf::from("Android/Home_1_1.png"));
    }
}
