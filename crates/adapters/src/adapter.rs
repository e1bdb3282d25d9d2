//! The capability contract every host adapter implements.

use chatnav_dom::{Document, NodeId, Url};

use crate::error::Result;
use crate::types::{AdapterTiming, CandidateMessage, MessageElement, OrderPolicy, Role};

/// Attribute carrying the identifier of a detected message element.
pub const MARKER_ATTR: &str = "data-chatnav-id";

/// Prefix shared by every attribute the engine writes into the host tree.
pub const OWN_ATTR_PREFIX: &str = "data-chatnav-";

/// Per-host detection heuristics behind one fixed interface.
///
/// Only [`name`](Self::name), [`is_active`](Self::is_active) and
/// [`message_elements`](Self::message_elements) are required; everything
/// else has a default that fits a plain chat page.
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Heading used for assistant turns in copied text.
    fn assistant_name(&self) -> &'static str {
        "Assistant"
    }

    fn is_active(&self, location: &Url) -> bool;

    /// Message elements in document order. Must not fail on a page that has
    /// not rendered its conversation yet; return an empty list instead.
    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>>;

    /// Text of one message element.
    fn extract_text(&self, doc: &Document, element: NodeId, _role: Role) -> Result<String> {
        Ok(doc.inner_text(element))
    }

    /// Candidates for the current tree. Elements without a host identifier
    /// get an idempotent marker so later passes see the same id.
    fn detect_messages(&self, doc: &mut Document) -> Result<Vec<CandidateMessage>> {
        let elements = self.message_elements(doc)?;
        let mut out = Vec::with_capacity(elements.len());
        for item in elements {
            let text = self.extract_text(doc, item.element, item.role)?;
            if text.trim().is_empty() {
                continue;
            }
            let stable_id = match item.host_id {
                Some(id) => {
                    doc.set_attribute(item.element, MARKER_ATTR, &id)?;
                    id
                }
                None => doc.ensure_marker(item.element, MARKER_ATTR, self.name())?,
            };
            out.push(CandidateMessage {
                role: item.role,
                full_content: text,
                stable_id: Some(stable_id),
                order_hint: item.order_hint,
                element: Some(item.element),
            });
        }
        Ok(out)
    }

    /// Subtree the scheduler subscribes to. `None` while the host has not
    /// rendered it yet.
    fn container(&self, doc: &Document) -> Result<Option<NodeId>> {
        Ok(Some(doc.body()))
    }

    fn is_streaming(&self, _doc: &Document) -> Result<bool> {
        Ok(false)
    }

    fn timing(&self) -> AdapterTiming {
        AdapterTiming::default()
    }

    /// Conversation key for a location.
    fn normalize_url(&self, url: &Url) -> String {
        strip_fragment(url)
    }

    fn order_policy(&self) -> OrderPolicy {
        OrderPolicy::Native
    }

    /// Whether attribute and text changes count as host mutations.
    fn observes_attributes(&self) -> bool {
        false
    }

    /// Elements the host is known to scroll, best first.
    fn scroll_container_candidates(&self, _doc: &Document) -> Result<Vec<NodeId>> {
        Ok(Vec::new())
    }

    fn locate_by_id(&self, doc: &Document, id: &str) -> Result<Option<NodeId>> {
        Ok(doc.find_by_attribute(doc.root(), MARKER_ATTR, id))
    }

    /// Subtrees searched when a message has to be found by its text.
    fn relocation_scopes(&self, doc: &Document) -> Result<Vec<NodeId>> {
        Ok(self.container(doc)?.into_iter().collect())
    }

    /// Finds a message element of `role` whose text starts with `prefix`.
    /// Known message elements are tried first, then the deepest matching
    /// element inside the relocation scopes.
    fn locate_by_content(&self, doc: &Document, role: Role, prefix: &str) -> Result<Option<NodeId>> {
        let wanted = squash_whitespace(prefix);
        if wanted.is_empty() {
            return Ok(None);
        }
        for item in self.message_elements(doc)? {
            if item.role != role {
                continue;
            }
            let text = self.extract_text(doc, item.element, item.role)?;
            if squash_whitespace(&text).starts_with(&wanted) {
                return Ok(Some(item.element));
            }
        }
        let mut best: Option<(usize, NodeId)> = None;
        for scope in self.relocation_scopes(doc)? {
            for node in doc.descendants(scope) {
                if !doc.is_element(node) {
                    continue;
                }
                if !squash_whitespace(&doc.text_content(node)).starts_with(&wanted) {
                    continue;
                }
                let depth = doc.depth(node).unwrap_or_default();
                if best.map_or(true, |(d, _)| depth > d) {
                    best = Some((depth, node));
                }
            }
        }
        Ok(best.map(|(_, node)| node))
    }
}

/// Collapses every whitespace run to one space and trims the ends.
pub fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drops the fragment and any trailing slash.
pub fn strip_fragment(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.as_str().trim_end_matches('/').to_string()
}

/// Like [`strip_fragment`], also dropping the query string.
pub fn strip_query_and_fragment(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    strip_fragment(&url)
}

/// True when the host is one of `domains` or a subdomain of one.
pub fn host_matches(url: &Url, domains: &[&str]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    domains.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|rest| rest.ends_with('.'))
    })
}

/// First match of `selector` inside `element`, falling back to the element.
pub(crate) fn inner_or_self(doc: &Document, element: NodeId, selector: &str) -> Result<NodeId> {
    Ok(doc.query(element, selector)?.unwrap_or(element))
}

/// True when anything under the document root matches `selector`.
pub(crate) fn any_match(doc: &Document, selector: &str) -> Result<bool> {
    Ok(doc.query(doc.root(), selector)?.is_some())
}
