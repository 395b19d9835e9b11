//! Export candidate selection.
//!
//! The export policy is top-level only: the children of the document are
//! pages, and only the direct FRAME/COMPONENT children of each page are
//! exported. Deeper descendants are never selected.
//!
//! When the source names a single node, [`select_scoped`] locates it with an
//! explicit stack walk and exports either that page's top-level nodes or the
//! node itself.

use crate::document::{DocumentNode, NodeType};

/// Page name used when a page has no name.
pub const DEFAULT_PAGE_NAME: &str = "Page";

/// Node name used when a node has no name.
pub const DEFAULT_NODE_NAME: &str = "unnamed";

/// A node selected for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportCandidate {
    /// API node id.
    pub node_id: String,
    /// Node name as authored (unsanitized).
    pub display_name: String,
    /// Name of the page containing the node (unsanitized).
    pub page_name: String,
}

/// Select the top-level FRAME/COMPONENT nodes of every page, in document order.
pub fn select_top_level(document: &DocumentNode) -> Vec<ExportCandidate> {
    let mut candidates = Vec::new();
    for page in document
        .children
        .iter()
        .filter(|node| node.kind() == NodeType::Canvas)
    {
        candidates.extend(page_candidates(page));
    }
    candidates
}

/// Select candidates for a single node of the document.
///
/// - A page yields its top-level FRAME/COMPONENT children.
/// - The document root behaves like [`select_top_level`].
/// - Any other node yields itself, grouped under its enclosing page.
///
/// Returns `None` if no node has the given id.
pub fn select_scoped(document: &DocumentNode, node_id: &str) -> Option<Vec<ExportCandidate>> {
    let (node, page) = find_node(document, node_id)?;
    let selected = match node.kind() {
        NodeType::Document => select_top_level(node),
        NodeType::Canvas => page_candidates(node),
        _ => {
            let page_name = page.map_or(DEFAULT_PAGE_NAME, page_name);
            candidate(node, page_name).into_iter().collect()
        }
    };
    Some(selected)
}

fn page_candidates(page: &DocumentNode) -> Vec<ExportCandidate> {
    let name = page_name(page);
    page.children
        .iter()
        .filter(|child| matches!(child.kind(), NodeType::Frame | NodeType::Component))
        .filter_map(|child| candidate(child, name))
        .collect()
}

fn page_name(page: &DocumentNode) -> &str {
    page.display_name().unwrap_or(DEFAULT_PAGE_NAME)
}

/// Build a candidate, skipping nodes without an id.
fn candidate(node: &DocumentNode, page_name: &str) -> Option<ExportCandidate> {
    let node_id = node.id.as_deref().filter(|id| !id.is_empty())?;
    Some(ExportCandidate {
        node_id: node_id.to_owned(),
        display_name: node.display_name().unwrap_or(DEFAULT_NODE_NAME).to_owned(),
        page_name: page_name.to_owned(),
    })
}

/// Find a node by id, returning it with its enclosing page.
fn find_node<'a>(
    root: &'a DocumentNode,
    node_id: &str,
) -> Option<(&'a DocumentNode, Option<&'a DocumentNode>)> {
    let mut stack: Vec<(&DocumentNode, Option<&DocumentNode>)> = vec![(root, None)];
    while let Some((node, page)) = stack.pop() {
        if node.id.as_deref() == Some(node_id) {
            return Some((node, page));
        }
        let page = if node.kind() == NodeType::Canvas {
            Some(node)
        } else {
            page
        };
        // Reversed so the first child is visited first.
        stack.extend(node.children.iter().rev().map(|child| (child, page)));
    }
    None
}
