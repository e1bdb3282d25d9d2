use chatnav_dom::{Document, NodeId, Url};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::adapter::{any_match, host_matches, inner_or_self, strip_query_and_fragment, PlatformAdapter};
use crate::error::Result;
use crate::types::{MessageElement, Role};

static TURN_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"conversation-turn-(\d+)").expect("valid regex"));

const STREAMING: &str =
    ".result-streaming, [data-testid='stop-button'], button[aria-label='Stop streaming']";

/// chatgpt.com. Messages carry `data-message-id` and sit inside numbered
/// `conversation-turn-N` articles.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatGptAdapter;

impl PlatformAdapter for ChatGptAdapter {
    fn name(&self) -> &'static str {
        "chatgpt"
    }

    fn assistant_name(&self) -> &'static str {
        "ChatGPT"
    }

    fn is_active(&self, location: &Url) -> bool {
        host_matches(location, &["chatgpt.com", "chat.openai.com"])
    }

    fn container(&self, doc: &Document) -> Result<Option<NodeId>> {
        Ok(doc.query(doc.body(), "main")?)
    }

    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>> {
        let Some(scope) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(scope, "[data-message-author-role]")? {
            let role = match doc.attr(node, "data-message-author-role") {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                // system and tool turns are not shown as messages
                _ => continue,
            };
            let mut item = MessageElement::new(role, node);
            item.host_id = doc
                .attr(node, "data-message-id")
                .filter(|id| !id.is_empty())
                .map(str::to_string);
            item.order_hint = turn_number(doc, node)?;
            out.push(item);
        }
        Ok(out)
    }

    fn extract_text(&self, doc: &Document, element: NodeId, role: Role) -> Result<String> {
        let body = match role {
            Role::User => inner_or_self(doc, element, ".whitespace-pre-wrap")?,
            Role::Assistant => inner_or_self(doc, element, ".markdown")?,
        };
        Ok(doc.inner_text(body))
    }

    fn is_streaming(&self, doc: &Document) -> Result<bool> {
        any_match(doc, STREAMING)
    }

    fn normalize_url(&self, url: &Url) -> String {
        strip_query_and_fragment(url)
    }

    fn scroll_container_candidates(&self, doc: &Document) -> Result<Vec<NodeId>> {
        Ok(doc.query_all(
            doc.root(),
            "div[class*='react-scroll-to-bottom'], main div.overflow-y-auto",
        )?)
    }
}

fn turn_number(doc: &Document, node: NodeId) -> Result<Option<u64>> {
    let Some(turn) = doc.closest(node, "[data-testid^='conversation-turn-']")? else {
        return Ok(None);
    };
    Ok(doc
        .attr(turn, "data-testid")
        .and_then(|testid| TURN_NUMBER.captures(testid))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok()))
}
