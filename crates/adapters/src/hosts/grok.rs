use chatnav_dom::{Document, NodeId, Url};
use std::time::Duration;

use crate::adapter::{any_match, host_matches, PlatformAdapter};
use crate::error::Result;
use crate::types::{AdapterTiming, MessageElement, Role};

/// grok.com and the embedded view on x.com. Bubbles are right-aligned for
/// the user; response ids come from the enclosing `response-*` row.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrokAdapter;

impl PlatformAdapter for GrokAdapter {
    fn name(&self) -> &'static str {
        "grok"
    }

    fn assistant_name(&self) -> &'static str {
        "Grok"
    }

    fn is_active(&self, location: &Url) -> bool {
        host_matches(location, &["grok.com"])
            || (host_matches(location, &["x.com"]) && location.path().starts_with("/i/grok"))
    }

    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>> {
        let Some(scope) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(scope, "div.message-bubble")? {
            let role = if doc.closest(node, ".items-end")?.is_some() {
                Role::User
            } else {
                Role::Assistant
            };
            let mut item = MessageElement::new(role, node);
            if let Some(row) = doc.closest(node, "[id^='response-']")? {
                item.host_id = doc.attr(row, "id").map(str::to_string);
            }
            out.push(item);
        }
        Ok(out)
    }

    fn is_streaming(&self, doc: &Document) -> Result<bool> {
        any_match(doc, "[data-streaming='true'], .message-bubble .animate-pulse")
    }

    fn timing(&self) -> AdapterTiming {
        AdapterTiming {
            debounce: Duration::from_millis(400),
            fallback_poll: Some(Duration::from_millis(2500)),
            ..AdapterTiming::default()
        }
    }

    fn scroll_container_candidates(&self, doc: &Document) -> Result<Vec<NodeId>> {
        Ok(doc.query_all(doc.root(), "div.overflow-y-auto, main")?)
    }
}
