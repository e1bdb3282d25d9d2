use chatnav_dom::{Document, NodeId, Url};
use std::time::Duration;

use crate::adapter::{any_match, host_matches, inner_or_self, PlatformAdapter};
use crate::error::Result;
use crate::types::{AdapterTiming, MessageElement, OrderPolicy, Role};

const MESSAGES: &str = "[data-testid='user-message'], div[data-is-streaming]";

/// claude.ai. No host identifiers; assistant turns toggle
/// `data-is-streaming` in place, so attribute changes matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeAdapter;

impl PlatformAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn assistant_name(&self) -> &'static str {
        "Claude"
    }

    fn is_active(&self, location: &Url) -> bool {
        host_matches(location, &["claude.ai"])
    }

    fn container(&self, doc: &Document) -> Result<Option<NodeId>> {
        let Some(first) = doc.query(doc.body(), MESSAGES)? else {
            return Ok(doc.query(doc.body(), "main")?);
        };
        Ok(doc.closest(first, "main")?.or(Some(doc.body())))
    }

    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>> {
        let Some(scope) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(scope, MESSAGES)? {
            let role = if doc.attr(node, "data-testid") == Some("user-message") {
                Role::User
            } else {
                Role::Assistant
            };
            out.push(MessageElement::new(role, node));
        }
        Ok(out)
    }

    fn extract_text(&self, doc: &Document, element: NodeId, role: Role) -> Result<String> {
        let body = match role {
            Role::User => element,
            Role::Assistant => inner_or_self(doc, element, ".font-claude-message")?,
        };
        Ok(doc.inner_text(body))
    }

    fn is_streaming(&self, doc: &Document) -> Result<bool> {
        any_match(doc, "[data-is-streaming='true']")
    }

    fn timing(&self) -> AdapterTiming {
        AdapterTiming {
            debounce: Duration::from_millis(500),
            streaming_wait: Duration::from_millis(3000),
            ..AdapterTiming::default()
        }
    }

    fn order_policy(&self) -> OrderPolicy {
        OrderPolicy::Renumber
    }

    fn observes_attributes(&self) -> bool {
        true
    }

    fn scroll_container_candidates(&self, doc: &Document) -> Result<Vec<NodeId>> {
        Ok(doc.query_all(doc.root(), "div.overflow-y-scroll, div.overflow-y-auto")?)
    }
}
