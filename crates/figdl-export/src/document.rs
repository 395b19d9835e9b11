//! Figma document snapshot types.
//!
//! Only the fields the exporter reads are modelled; everything else in the
//! `GET /files/{key}` response is ignored during deserialization.

use serde::Deserialize;

/// Response of `GET /files/{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileResponse {
    /// File title.
    #[serde(default)]
    pub name: Option<String>,
    /// Root of the document tree.
    pub document: DocumentNode,
}

/// Node kinds the exporter distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Document,
    /// A page.
    Canvas,
    Frame,
    Component,
    Other,
}

impl NodeType {
    fn from_api(value: &str) -> Self {
        match value {
            "DOCUMENT" => Self::Document,
            "CANVAS" => Self::Canvas,
            "FRAME" => Self::Frame,
            "COMPONENT" => Self::Component,
            _ => Self::Other,
        }
    }
}

/// A node of the document tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentNode {
    /// Node id, unique within the file.
    #[serde(default)]
    pub id: Option<String>,
    /// Raw node type (`DOCUMENT`, `CANVAS`, `FRAME`, ...).
    #[serde(rename = "type", default)]
    pub node_type: String,
    /// Human-authored name (not unique).
    #[serde(default)]
    pub name: Option<String>,
    /// Child nodes in document order.
    #[serde(default)]
    pub children: Vec<DocumentNode>,
}

impl DocumentNode {
    /// Create a node without children.
    pub fn new(id: &str, node_type: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_owned()),
            node_type: node_type.to_owned(),
            name: Some(name.to_owned()),
            children: Vec::new(),
        }
    }

    /// Replace the node's children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<DocumentNode>) -> Self {
        self.children = children;
        self
    }

    /// Parsed node type.
    pub fn kind(&self) -> NodeType {
        NodeType::from_api(&self.node_type)
    }

    /// Node name, or `None` when absent or empty.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}
