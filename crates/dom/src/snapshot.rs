//! JSON snapshots of host trees.
//!
//! A node with a `tag` is an element; a node with only `text` is a text node.
//! Fixtures and the CLI both build documents from these.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::document::Document;
use crate::error::{DomError, Result};
use crate::node::{Layout, NodeData};
use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            ..Self::default()
        }
    }

    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn class(self, classes: &str) -> Self {
        self.attr("class", classes)
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn child(mut self, child: NodeSnapshot) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeSnapshot>) -> Self {
        self.children.extend(children);
        self
    }

    /// Element containing a single text node.
    pub fn with_text(self, text: &str) -> Self {
        self.child(NodeSnapshot::text(text))
    }

    fn validate(&self) -> Result<()> {
        match (&self.tag, &self.text) {
            (Some(tag), _) if tag.trim().is_empty() => {
                Err(DomError::Snapshot("element tag must not be empty".to_string()))
            }
            (None, None) => Err(DomError::Snapshot(
                "node needs either `tag` or `text`".to_string(),
            )),
            (None, Some(_)) if !self.children.is_empty() || !self.attrs.is_empty() => Err(
                DomError::Snapshot("text nodes cannot carry attributes or children".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Geometry of the document scrolling element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Layout>,
    #[serde(default)]
    pub body: Vec<NodeSnapshot>,
}

impl DocumentSnapshot {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| DomError::Snapshot(e.to_string()))
    }
}

impl Document {
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Result<Self> {
        let mut doc = Self::new();
        if let Some(url) = &snapshot.url {
            doc.set_location(url)?;
        }
        if let Some(viewport) = snapshot.viewport {
            let root = doc.root();
            doc.set_layout(root, viewport)?;
        }
        let body = doc.body();
        for node in &snapshot.body {
            doc.append_snapshot(body, node)?;
        }
        Ok(doc)
    }

    /// Appends a whole subtree. Observers see one child-list record per
    /// inserted node, like a host inserting nodes one by one.
    pub fn append_snapshot(&mut self, parent: NodeId, snapshot: &NodeSnapshot) -> Result<NodeId> {
        snapshot.validate()?;
        let mut data = match &snapshot.tag {
            Some(tag) => NodeData::element(tag),
            None => NodeData::text(snapshot.text.as_deref().unwrap_or_default()),
        };
        if let Some(el) = data.as_element_mut() {
            el.attrs = snapshot.attrs.clone();
        }
        if let Some(layout) = snapshot.layout {
            data.layout = layout;
        }
        let id = self.insert_node(parent, None, data)?;
        if snapshot.tag.is_some() {
            if let Some(text) = &snapshot.text {
                self.append_text(id, text)?;
            }
            for child in &snapshot.children {
                self.append_snapshot(id, child)?;
            }
        }
        Ok(id)
    }
}
