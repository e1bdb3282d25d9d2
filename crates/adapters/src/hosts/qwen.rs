use chatnav_dom::{Document, NodeId, Url};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::adapter::{any_match, host_matches, inner_or_self, PlatformAdapter};
use crate::error::Result;
use crate::types::{MessageElement, Role};

static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^qwen-chat-message-(user|assistant)-(.+)$").expect("valid regex")
});

/// chat.qwen.ai. Role and identifier are both encoded in the element id.
#[derive(Debug, Default, Clone, Copy)]
pub struct QwenAdapter;

impl PlatformAdapter for QwenAdapter {
    fn name(&self) -> &'static str {
        "qwen"
    }

    fn assistant_name(&self) -> &'static str {
        "Qwen"
    }

    fn is_active(&self, location: &Url) -> bool {
        host_matches(location, &["chat.qwen.ai"])
    }

    fn container(&self, doc: &Document) -> Result<Option<NodeId>> {
        Ok(doc.query(doc.body(), "#chat-message-container")?.or(Some(doc.body())))
    }

    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>> {
        let Some(scope) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(scope, "[id^='qwen-chat-message-']")? {
            let Some(caps) = doc.attr(node, "id").and_then(|id| MESSAGE_ID.captures(id)) else {
                continue;
            };
            let role = match &caps[1] {
                "user" => Role::User,
                _ => Role::Assistant,
            };
            let mut item = MessageElement::new(role, node);
            item.host_id = Some(caps[2].to_string());
            out.push(item);
        }
        Ok(out)
    }

    fn extract_text(&self, doc: &Document, element: NodeId, role: Role) -> Result<String> {
        let body = match role {
            Role::User => inner_or_self(doc, element, ".user-message-content")?,
            Role::Assistant => inner_or_self(doc, element, ".response-message-content")?,
        };
        Ok(doc.inner_text(body))
    }

    fn is_streaming(&self, doc: &Document) -> Result<bool> {
        any_match(doc, "button.stop-button, [data-generating='true']")
    }
}
