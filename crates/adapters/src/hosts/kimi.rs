use chatnav_dom::{Document, NodeId, Url};

use crate::adapter::{any_match, host_matches, inner_or_self, PlatformAdapter};
use crate::error::Result;
use crate::types::{MessageElement, OrderPolicy, Role};

#[derive(Debug, Default, Clone, Copy)]
pub struct KimiAdapter;

impl PlatformAdapter for KimiAdapter {
    fn name(&self) -> &'static str {
        "kimi"
    }

    fn assistant_name(&self) -> &'static str {
        "Kimi"
    }

    fn is_active(&self, location: &Url) -> bool {
        host_matches(location, &["kimi.com", "kimi.moonshot.cn"])
    }

    fn container(&self, doc: &Document) -> Result<Option<NodeId>> {
        Ok(doc
            .query(doc.body(), ".chat-content-list")?
            .or(Some(doc.body())))
    }

    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>> {
        let Some(scope) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(scope, ".chat-content-item")? {
            let role = if doc.has_class(node, "chat-content-item-user") {
                Role::User
            } else if doc.has_class(node, "chat-content-item-assistant") {
                Role::Assistant
            } else {
                continue;
            };
            out.push(MessageElement::new(role, node));
        }
        Ok(out)
    }

    fn extract_text(&self, doc: &Document, element: NodeId, role: Role) -> Result<String> {
        let body = match role {
            Role::User => inner_or_self(doc, element, ".user-content")?,
            Role::Assistant => inner_or_self(doc, element, ".markdown")?,
        };
        Ok(doc.inner_text(body))
    }

    fn is_streaming(&self, doc: &Document) -> Result<bool> {
        any_match(doc, ".typing-indicator, [data-status='streaming']")
    }

    fn order_policy(&self) -> OrderPolicy {
        OrderPolicy::Renumber
    }
}
