use chatnav_dom::{Document, NodeId, Url};

use crate::adapter::{any_match, host_matches, PlatformAdapter};
use crate::error::Result;
use crate::types::{MessageElement, OrderPolicy, Role};

/// chat.deepseek.com. Both roles share `.ds-message`; assistant turns are
/// the ones rendering `.ds-markdown`. Reasoning blocks are not message text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeepSeekAdapter;

impl PlatformAdapter for DeepSeekAdapter {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn assistant_name(&self) -> &'static str {
        "DeepSeek"
    }

    fn is_active(&self, location: &Url) -> bool {
        host_matches(location, &["chat.deepseek.com"])
    }

    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>> {
        let Some(scope) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(scope, ".ds-message")? {
            let role = if doc.query(node, ".ds-markdown")?.is_some() {
                Role::Assistant
            } else {
                Role::User
            };
            out.push(MessageElement::new(role, node));
        }
        Ok(out)
    }

    fn extract_text(&self, doc: &Document, element: NodeId, role: Role) -> Result<String> {
        if role == Role::User {
            return Ok(doc.inner_text(element));
        }
        let mut parts = Vec::new();
        for block in doc.query_all(element, ".ds-markdown")? {
            if doc.closest(block, ".ds-think-content")?.is_some() {
                continue;
            }
            parts.push(doc.inner_text(block));
        }
        Ok(parts.join("\n\n"))
    }

    fn is_streaming(&self, doc: &Document) -> Result<bool> {
        any_match(doc, ".ds-loading, [aria-label='Stop generating']")
    }

    fn order_policy(&self) -> OrderPolicy {
        OrderPolicy::Renumber
    }
}
