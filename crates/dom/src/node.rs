use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Weak handle to a node in a [`crate::Document`].
///
/// Handles are plain values and never keep a node alive. Removing a node bumps
/// the generation of its slot, so a handle taken before the removal stops
/// resolving even if the slot is later reused for a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}v{}", self.index, self.generation)
    }
}

/// CSS `overflow-y` as far as scroll container detection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    #[default]
    Visible,
    Hidden,
    Auto,
    Scroll,
}

impl Overflow {
    pub const fn allows_scrolling(self) -> bool {
        matches!(self, Self::Auto | Self::Scroll)
    }
}

/// Box geometry of a node, in CSS pixels.
///
/// `offset_top` is relative to the parent's content origin. Scroll fields only
/// matter for nodes acting as scroll containers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub offset_top: f64,
    pub height: f64,
    pub overflow_y: Overflow,
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Layout {
    pub fn block(offset_top: f64, height: f64) -> Self {
        Self {
            offset_top,
            height,
            ..Self::default()
        }
    }

    pub fn scroller(offset_top: f64, client_height: f64, scroll_height: f64) -> Self {
        Self {
            offset_top,
            height: client_height,
            overflow_y: Overflow::Auto,
            scroll_top: 0.0,
            scroll_height,
            client_height,
        }
    }

    /// Largest valid `scroll_top` for this box.
    pub fn max_scroll_top(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ElementData {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
}

impl ElementData {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attrs
            .get("class")
            .map(|v| v.split_ascii_whitespace())
            .into_iter()
            .flatten()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub layout: Layout,
}

impl NodeData {
    pub fn element(tag: &str) -> Self {
        Self {
            kind: NodeKind::Element(ElementData::new(tag)),
            parent: None,
            children: Vec::new(),
            layout: Layout::default(),
        }
    }

    pub fn text(text: &str) -> Self {
        Self {
            kind: NodeKind::Text(text.to_string()),
            parent: None,
            children: Vec::new(),
            layout: Layout::default(),
        }
    }

    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }
}

/// Tags rendered as blocks by `inner_text`.
pub(crate) const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "br",
    "dd",
    "div",
    "dl",
    "dt",
    "figure",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "tr",
    "ul",
];
