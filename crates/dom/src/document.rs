use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use url::Url;

use crate::error::{DomError, Result};
use crate::node::{ElementData, Layout, NodeData, NodeKind, BLOCK_TAGS};
use crate::observer::{MutationKind, MutationObserver, MutationRecord, ObserveOptions, ObserverEntry};
use crate::selector::Selector;
use crate::NodeId;

/// Viewport height given to fresh documents.
pub const DEFAULT_VIEWPORT_HEIGHT: f64 = 800.0;

struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

/// In-memory host document.
///
/// Nodes live in a generational arena. Every live node is connected to the
/// root: removal frees the whole subtree, which is what makes stale
/// [`NodeId`]s detectable.
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    body: NodeId,
    location: Option<Url>,
    observers: Vec<ObserverEntry>,
    marker_seq: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.node_count())
            .field("location", &self.location.as_ref().map(Url::as_str))
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId::new(0, 0),
            body: NodeId::new(0, 0),
            location: None,
            observers: Vec::new(),
            marker_seq: 0,
        };
        let mut root = NodeData::element("html");
        root.layout = Layout::scroller(0.0, DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_HEIGHT);
        doc.root = doc.alloc(root);
        let mut body = NodeData::element("body");
        body.parent = Some(doc.root);
        let body_id = doc.alloc(body);
        if let Some(root) = doc.get_mut(doc.root) {
            root.children.push(body_id);
        }
        doc.body = body_id;
        doc
    }

    pub fn with_location(url: &str) -> Result<Self> {
        let mut doc = Self::new();
        doc.set_location(url)?;
        Ok(doc)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    pub fn set_location(&mut self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|e| DomError::InvalidUrl(format!("{url}: {e}")))?;
        self.location = Some(parsed);
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    // ---------------------------------------------------------------------
    // Arena

    fn alloc(&mut self, data: NodeData) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(data);
            return NodeId::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            node: Some(data),
        });
        NodeId::new(index, 0)
    }

    fn get(&self, id: NodeId) -> Option<&NodeData> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn live(&self, id: NodeId) -> Result<&NodeData> {
        self.get(id).ok_or(DomError::Detached(id))
    }

    fn live_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.get_mut(id).ok_or(DomError::Detached(id))
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(slot) = self.slots.get_mut(current.index as usize) else {
                continue;
            };
            if slot.generation != current.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                stack.extend(node.children);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(current.index);
        }
    }

    // ---------------------------------------------------------------------
    // Inspection

    /// True while the handle refers to a node that is still in the tree.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn element_data(&self, id: NodeId) -> Option<&ElementData> {
        self.get(id)?.as_element()
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element_data(id).is_some()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element_data(id).map(|e| e.tag.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element_data(id)?.attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.element_data(id).is_some_and(|e| e.has_class(class))
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        self.element_data(id)?.style.get(property).map(String::as_str)
    }

    pub fn layout(&self, id: NodeId) -> Option<Layout> {
        self.get(id).map(|n| n.layout)
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.parent(id);
        while let Some(node) = cursor {
            out.push(node);
            cursor = self.parent(node);
        }
        out
    }

    /// Pre-order descendants, excluding `scope` itself.
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    // ---------------------------------------------------------------------
    // Mutation

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> Result<NodeId> {
        self.insert_node(parent, None, NodeData::element(tag))
    }

    pub fn append_element_with(
        &mut self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> Result<NodeId> {
        let mut data = NodeData::element(tag);
        if let Some(el) = data.as_element_mut() {
            for (name, value) in attrs {
                el.attrs.insert((*name).to_string(), (*value).to_string());
            }
        }
        self.insert_node(parent, None, data)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId> {
        self.insert_node(parent, None, NodeData::text(text))
    }

    pub fn insert_element_before(
        &mut self,
        parent: NodeId,
        reference: NodeId,
        tag: &str,
    ) -> Result<NodeId> {
        self.insert_node(parent, Some(reference), NodeData::element(tag))
    }

    pub(crate) fn insert_node(
        &mut self,
        parent: NodeId,
        before: Option<NodeId>,
        mut data: NodeData,
    ) -> Result<NodeId> {
        let parent_node = self.live(parent)?;
        if parent_node.as_element().is_none() {
            return Err(DomError::NotAnElement(parent));
        }
        let position = match before {
            Some(reference) => Some(
                parent_node
                    .children
                    .iter()
                    .position(|c| *c == reference)
                    .ok_or(DomError::NotAChild { parent, reference })?,
            ),
            None => None,
        };
        data.parent = Some(parent);
        let id = self.alloc(data);
        let parent_node = self.live_mut(parent)?;
        match position {
            Some(pos) => parent_node.children.insert(pos, id),
            None => parent_node.children.push(id),
        }
        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: 1,
                removed: 0,
            },
        });
        Ok(id)
    }

    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == self.root || id == self.body {
            return Err(DomError::RootRemoval);
        }
        let parent = self.live(id)?.parent.ok_or(DomError::RootRemoval)?;
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.retain(|c| *c != id);
        }
        self.free_subtree(id);
        log::trace!("removed subtree {id} from {parent}");
        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: 0,
                removed: 1,
            },
        });
        Ok(())
    }

    /// Replaces the text of a text node, or all children of an element with a
    /// single text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        let node = self.live_mut(id)?;
        if let NodeKind::Text(current) = &mut node.kind {
            if current.as_str() != text {
                *current = text.to_string();
                self.notify(MutationRecord {
                    target: id,
                    kind: MutationKind::CharacterData,
                });
            }
            return Ok(());
        }
        let old_children = std::mem::take(&mut node.children);
        let removed = old_children.len();
        for child in old_children {
            self.free_subtree(child);
        }
        let mut data = NodeData::text(text);
        data.parent = Some(id);
        let text_id = self.alloc(data);
        self.live_mut(id)?.children.push(text_id);
        self.notify(MutationRecord {
            target: id,
            kind: MutationKind::ChildList { added: 1, removed },
        });
        Ok(())
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        let el = self
            .live_mut(id)?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(id))?;
        if el.attrs.get(name).map(String::as_str) == Some(value) {
            return Ok(());
        }
        el.attrs.insert(name.to_string(), value.to_string());
        self.notify(MutationRecord {
            target: id,
            kind: MutationKind::Attribute {
                name: name.to_string(),
            },
        });
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<()> {
        let el = self
            .live_mut(id)?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(id))?;
        if el.attrs.remove(name).is_some() {
            self.notify(MutationRecord {
                target: id,
                kind: MutationKind::Attribute {
                    name: name.to_string(),
                },
            });
        }
        Ok(())
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) -> Result<()> {
        let el = self
            .live_mut(id)?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(id))?;
        if el.style.get(property).map(String::as_str) == Some(value) {
            return Ok(());
        }
        el.style.insert(property.to_string(), value.to_string());
        self.notify_style(id);
        Ok(())
    }

    pub fn remove_style(&mut self, id: NodeId, property: &str) -> Result<()> {
        let el = self
            .live_mut(id)?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(id))?;
        if el.style.remove(property).is_some() {
            self.notify_style(id);
        }
        Ok(())
    }

    fn notify_style(&mut self, id: NodeId) {
        self.notify(MutationRecord {
            target: id,
            kind: MutationKind::Attribute {
                name: "style".to_string(),
            },
        });
    }

    /// Layout is not part of the observable tree, so this emits no record.
    pub fn set_layout(&mut self, id: NodeId, layout: Layout) -> Result<()> {
        self.live_mut(id)?.layout = layout;
        Ok(())
    }

    /// Sets `scroll_top`, clamped to the scrollable range. Returns the applied value.
    pub fn set_scroll_top(&mut self, id: NodeId, value: f64) -> Result<f64> {
        let layout = &mut self.live_mut(id)?.layout;
        let clamped = value.clamp(0.0, layout.max_scroll_top());
        layout.scroll_top = clamped;
        Ok(clamped)
    }

    /// Returns the value of `attr` on `id`, attaching `<prefix>-<n>` first when
    /// the attribute is missing. Calling it again on the same node is a no-op.
    pub fn ensure_marker(&mut self, id: NodeId, attr: &str, prefix: &str) -> Result<String> {
        if let Some(existing) = self.attr(id, attr).filter(|v| !v.is_empty()) {
            return Ok(existing.to_string());
        }
        self.marker_seq += 1;
        let value = format!("{prefix}-{}", self.marker_seq);
        self.set_attribute(id, attr, &value)?;
        Ok(value)
    }

    // ---------------------------------------------------------------------
    // Observation

    pub fn observe(&mut self, target: NodeId, options: ObserveOptions) -> Result<MutationObserver> {
        self.live(target)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.observers.push(ObserverEntry {
            target,
            options,
            sender,
        });
        Ok(MutationObserver::new(target, receiver))
    }

    pub fn observer_count(&mut self) -> usize {
        self.observers.retain(|o| !o.sender.is_closed());
        self.observers.len()
    }

    fn notify(&mut self, record: MutationRecord) {
        self.observers.retain(|o| !o.sender.is_closed());
        if self.observers.is_empty() {
            return;
        }
        let mut deliver = Vec::new();
        for (idx, observer) in self.observers.iter().enumerate() {
            if !observer.wants(&record) {
                continue;
            }
            let in_scope = observer.target == record.target
                || (observer.options.subtree && self.contains(observer.target, record.target));
            if in_scope {
                deliver.push(idx);
            }
        }
        for idx in deliver {
            let _ = self.observers[idx].sender.send(record.clone());
        }
    }

    // ---------------------------------------------------------------------
    // Selectors

    pub fn query_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self.select_all(scope, &selector))
    }

    pub fn query(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self
            .descendants(scope)
            .into_iter()
            .find(|n| selector.matches(self, *n)))
    }

    pub fn select_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|n| selector.matches(self, *n))
            .collect()
    }

    pub fn matches(&self, id: NodeId, selector: &str) -> Result<bool> {
        let selector = Selector::parse(selector)?;
        Ok(selector.matches(self, id))
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let selector = Selector::parse(selector)?;
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            if selector.matches(self, node) {
                return Ok(Some(node));
            }
            cursor = self.parent(node);
        }
        Ok(None)
    }

    pub fn find_by_attribute(&self, scope: NodeId, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|n| self.attr(*n, name) == Some(value))
    }

    // ---------------------------------------------------------------------
    // Text

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(_) => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Rendered-ish text: block elements start on their own line, runs of
    /// blank lines collapse to one, each line is whitespace-normalized.
    pub fn inner_text(&self, id: NodeId) -> String {
        let mut raw = String::new();
        self.collect_inner_text(id, &mut raw);

        let mut lines: Vec<String> = Vec::new();
        for line in raw.split('\n') {
            let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
            if normalized.is_empty() && lines.last().map_or(true, String::is_empty) {
                continue;
            }
            lines.push(normalized);
        }
        while lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        lines.join("\n")
    }

    fn collect_inner_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(el) => {
                if matches!(el.tag.as_str(), "script" | "style" | "template") {
                    return;
                }
                if el.tag == "br" {
                    out.push('\n');
                    return;
                }
                let block = BLOCK_TAGS.contains(&el.tag.as_str());
                if block && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                for child in &node.children {
                    self.collect_inner_text(*child, out);
                }
                if block && !out.ends_with('\n') {
                    out.push('\n');
                }
                if el.tag == "p" {
                    out.push('\n');
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Tree metrics

    /// Inclusive containment.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        if !self.is_attached(ancestor) {
            return false;
        }
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn depth(&self, id: NodeId) -> Option<usize> {
        self.get(id)?;
        Some(self.ancestors(id).len())
    }

    /// Number of edges on the tree path between two nodes.
    pub fn tree_distance(&self, a: NodeId, b: NodeId) -> Option<usize> {
        if !self.is_attached(a) || !self.is_attached(b) {
            return None;
        }
        let mut hops_from_a: HashMap<NodeId, usize> = HashMap::new();
        hops_from_a.insert(a, 0);
        for (idx, ancestor) in self.ancestors(a).into_iter().enumerate() {
            hops_from_a.insert(ancestor, idx + 1);
        }
        let mut cursor = Some(b);
        let mut hops_from_b = 0usize;
        while let Some(current) = cursor {
            if let Some(up) = hops_from_a.get(&current) {
                return Some(up + hops_from_b);
            }
            hops_from_b += 1;
            cursor = self.parent(current);
        }
        None
    }

    /// Child indices from the root down to `id`.
    pub fn position_path(&self, id: NodeId) -> Option<Vec<usize>> {
        self.get(id)?;
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            let idx = self.children(parent).iter().position(|c| *c == current)?;
            path.push(idx);
            current = parent;
        }
        path.reverse();
        Some(path)
    }

    /// Document order; ancestors sort before their descendants. `None` when
    /// either node is gone.
    pub fn compare_document_position(&self, a: NodeId, b: NodeId) -> Option<Ordering> {
        let pa = self.position_path(a)?;
        let pb = self.position_path(b)?;
        Some(pa.cmp(&pb))
    }

    // ---------------------------------------------------------------------
    // Geometry

    /// Viewport-relative top edge: offsets summed up the tree minus the
    /// scroll offsets of every ancestor.
    pub fn rect_top(&self, id: NodeId) -> Option<f64> {
        let mut top = self.get(id)?.layout.offset_top;
        for ancestor in self.ancestors(id) {
            let layout = self.get(ancestor)?.layout;
            top += layout.offset_top - layout.scroll_top;
        }
        Some(top)
    }

    /// Overflow styling that scrolls and more than `min_slack` pixels of
    /// scrollable content.
    pub fn is_scroll_container(&self, id: NodeId, min_slack: f64) -> bool {
        self.get(id).is_some_and(|n| {
            let layout = n.layout;
            layout.overflow_y.allows_scrolling()
                && layout.scroll_height - layout.client_height > min_slack
        })
    }
}

/// Document handle shared between the sync driver, scroll tasks and whoever
/// mutates the host tree.
#[derive(Clone, Default)]
pub struct SharedDocument(Arc<Mutex<Document>>);

impl SharedDocument {
    pub fn new(doc: Document) -> Self {
        Self(Arc::new(Mutex::new(doc)))
    }

    /// Locks the document. A panic while holding the lock leaves the tree in
    /// whatever state it reached, which is still a valid tree.
    pub fn lock(&self) -> MutexGuard<'_, Document> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

impl std::fmt::Debug for SharedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedDocument").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn thread_fixture() -> (Document, NodeId, Vec<NodeId>) {
        let mut doc = Document::new();
        let main = doc
            .append_element_with(doc.body(), "main", &[("id", "thread")])
            .expect("main");
        let mut turns = Vec::new();
        for (role, text) in [("user", "hello"), ("assistant", "hi there")] {
            let turn = doc
                .append_element_with(main, "div", &[("class", "turn"), ("data-role", role)])
                .expect("turn");
            doc.append_text(turn, text).expect("text");
            turns.push(turn);
        }
        (doc, main, turns)
    }

    #[test]
    fn removal_invalidates_handles_even_after_slot_reuse() {
        let (mut doc, main, turns) = thread_fixture();
        let removed = turns[0];
        doc.remove(removed).expect("remove");
        assert!(!doc.is_attached(removed));

        let fresh: Vec<NodeId> = (0..2)
            .map(|_| doc.append_element(main, "div").expect("append"))
            .collect();
        let reused = fresh
            .iter()
            .find(|n| n.index() == removed.index())
            .expect("slot reused");
        assert_ne!(reused.generation(), removed.generation());
        assert!(doc.is_attached(*reused));
        assert!(!doc.is_attached(removed));
        assert_eq!(doc.tag(removed), None);
    }

    #[test]
    fn queries_follow_document_order() {
        let (doc, main, turns) = thread_fixture();
        let found = doc.query_all(doc.root(), "#thread > .turn").expect("query");
        assert_eq!(found, turns);
        let user = doc
            .query(main, "div[data-role=user]")
            .expect("query")
            .expect("user turn");
        assert_eq!(user, turns[0]);
        let text = doc.children(turns[1])[0];
        assert_eq!(
            doc.closest(text, "main").expect("closest"),
            Some(main)
        );
        assert!(doc.query_all(main, "div[").is_err());
    }

    #[test]
    fn tree_distance_counts_edges_through_common_ancestor() {
        let (doc, main, turns) = thread_fixture();
        assert_eq!(doc.tree_distance(turns[0], turns[0]), Some(0));
        assert_eq!(doc.tree_distance(main, turns[0]), Some(1));
        assert_eq!(doc.tree_distance(turns[0], turns[1]), Some(2));
        let text = doc.children(turns[1])[0];
        assert_eq!(doc.tree_distance(turns[0], text), Some(3));
    }

    #[test]
    fn document_position_puts_ancestors_first() {
        let (doc, main, turns) = thread_fixture();
        assert_eq!(
            doc.compare_document_position(turns[0], turns[1]),
            Some(Ordering::Less)
        );
        assert_eq!(
            doc.compare_document_position(turns[0], main),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn inner_text_separates_blocks_and_collapses_blank_lines() {
        let mut doc = Document::new();
        let msg = doc.append_element(doc.body(), "div").expect("msg");
        let p1 = doc.append_element(msg, "p").expect("p1");
        doc.append_text(p1, "  First   line ").expect("t1");
        let p2 = doc.append_element(msg, "p").expect("p2");
        doc.append_text(p2, "Second").expect("t2");
        let span = doc.append_element(p2, "span").expect("span");
        doc.append_text(span, " tail").expect("t3");
        let style = doc.append_element(msg, "style").expect("style");
        doc.append_text(style, ".x{}").expect("css");

        assert_eq!(doc.inner_text(msg), "First line\n\nSecond tail");
        assert_eq!(doc.text_content(p2), "Second tail");
    }

    #[test]
    fn markers_are_idempotent() {
        let (mut doc, _main, turns) = thread_fixture();
        let first = doc
            .ensure_marker(turns[0], "data-chatnav-id", "m")
            .expect("marker");
        let again = doc
            .ensure_marker(turns[0], "data-chatnav-id", "m")
            .expect("marker");
        let other = doc
            .ensure_marker(turns[1], "data-chatnav-id", "m")
            .expect("marker");
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn observers_receive_subtree_records_until_dropped() {
        let (mut doc, main, turns) = thread_fixture();
        let mut observer = doc.observe(main, ObserveOptions::default()).expect("observe");
        let mut attrs = doc
            .observe(main, ObserveOptions::default().with_attributes(true))
            .expect("observe attrs");

        doc.append_text(turns[0], " again").expect("append");
        doc.set_attribute(turns[1], "data-streaming", "true")
            .expect("attr");
        doc.append_element(doc.body(), "aside").expect("outside");

        let records = observer.take_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, turns[0]);
        let records = attrs.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].attribute_name(), Some("data-streaming"));

        drop(observer);
        drop(attrs);
        assert_eq!(doc.observer_count(), 0);
    }

    #[test]
    fn rect_top_subtracts_ancestor_scroll() {
        let mut doc = Document::new();
        let scroller = doc.append_element(doc.body(), "div").expect("scroller");
        doc.set_layout(scroller, Layout::scroller(100.0, 500.0, 3_000.0))
            .expect("layout");
        let item = doc.append_element(scroller, "div").expect("item");
        doc.set_layout(item, Layout::block(1_200.0, 80.0))
            .expect("layout");

        assert_eq!(doc.rect_top(item), Some(1_300.0));
        let applied = doc.set_scroll_top(scroller, 10_000.0).expect("scroll");
        assert_eq!(applied, 2_500.0);
        assert_eq!(doc.rect_top(item), Some(-1_200.0));
        assert!(doc.is_scroll_container(scroller, 50.0));
        assert!(!doc.is_scroll_container(item, 50.0));
    }

    #[test]
    fn body_and_root_cannot_be_removed() {
        let mut doc = Document::new();
        assert_eq!(doc.remove(doc.body()), Err(DomError::RootRemoval));
        assert_eq!(doc.remove(doc.root()), Err(DomError::RootRemoval));
    }
}
