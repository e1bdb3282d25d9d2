use chatnav_dom::{Document, NodeId, Url};
use std::time::Duration;

use crate::adapter::{any_match, host_matches, inner_or_self, strip_query_and_fragment, PlatformAdapter};
use crate::error::Result;
use crate::types::{AdapterTiming, MessageElement, PrimingPlan, Role};

/// gemini.google.com. Turns live in `.conversation-container[id]` blocks
/// holding one `user-query` and one `model-response`. The history is
/// virtualized and does not always emit child-list changes, hence the poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiAdapter;

impl PlatformAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn assistant_name(&self) -> &'static str {
        "Gemini"
    }

    fn is_active(&self, location: &Url) -> bool {
        host_matches(location, &["gemini.google.com"])
    }

    fn container(&self, doc: &Document) -> Result<Option<NodeId>> {
        Ok(doc.query(doc.body(), "#chat-history, infinite-scroller.chat-history")?)
    }

    fn message_elements(&self, doc: &Document) -> Result<Vec<MessageElement>> {
        let Some(scope) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(scope, "user-query, model-response")? {
            let role = match doc.tag(node) {
                Some("user-query") => Role::User,
                _ => Role::Assistant,
            };
            let mut item = MessageElement::new(role, node);
            if let Some(turn) = doc.closest(node, ".conversation-container[id]")? {
                item.host_id = doc
                    .attr(turn, "id")
                    .map(|id| format!("{id}:{}", role.as_str()));
            }
            out.push(item);
        }
        Ok(out)
    }

    fn extract_text(&self, doc: &Document, element: NodeId, role: Role) -> Result<String> {
        let body = match role {
            Role::User => inner_or_self(doc, element, ".query-text")?,
            Role::Assistant => inner_or_self(doc, element, "message-content")?,
        };
        Ok(doc.inner_text(body))
    }

    fn is_streaming(&self, doc: &Document) -> Result<bool> {
        any_match(doc, "model-response [aria-busy='true'], button.send-button.stop")
    }

    fn timing(&self) -> AdapterTiming {
        AdapterTiming {
            debounce: Duration::from_millis(500),
            priming: PrimingPlan {
                attempts: 12,
                ..PrimingPlan::default()
            },
            fallback_poll: Some(Duration::from_secs(3)),
            ..AdapterTiming::default()
        }
    }

    fn normalize_url(&self, url: &Url) -> String {
        strip_query_and_fragment(url)
    }

    fn scroll_container_candidates(&self, doc: &Document) -> Result<Vec<NodeId>> {
        Ok(doc.query_all(doc.root(), "infinite-scroller.chat-history, #chat-history")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatnav_dom::{DocumentSnapshot, NodeSnapshot};
    use pretty_assertions::assert_eq;

    fn turn(id: &str, question: &str, answer: &str) -> NodeSnapshot {
        NodeSnapshot::element("div")
            .class("conversation-container")
            .attr("id", id)
            .child(
                NodeSnapshot::element("user-query").child(
                    NodeSnapshot::element("div")
                        .class("query-text")
                        .with_text(question),
                ),
            )
            .child(
                NodeSnapshot::element("model-response")
                    .child(NodeSnapshot::element("message-content").with_text(answer))
                    .child(NodeSnapshot::element("div").class("actions").with_text("Share")),
            )
    }

    fn fixture() -> Document {
        let snapshot = DocumentSnapshot {
            url: Some("https://gemini.google.com/app/9f8e?hl=en".to_string()),
            viewport: None,
            body: vec![NodeSnapshot::element("infinite-scroller")
                .class("chat-history")
                .attr("id", "chat-history")
                .children([turn("c_1", "hi", "hello"), turn("c_2", "hi", "hello again")])],
        };
        Document::from_snapshot(&snapshot).expect("fixture")
    }

    #[test]
    fn ids_are_scoped_by_turn_and_role() {
        let mut doc = fixture();
        let found = GeminiAdapter.detect_messages(&mut doc).expect("detect");
        let ids: Vec<_> = found.iter().filter_map(|c| c.stable_id.clone()).collect();
        assert_eq!(ids, vec!["c_1:user", "c_1:assistant", "c_2:user", "c_2:assistant"]);
        assert_eq!(found[1].full_content, "hello");
        assert!(found.iter().all(|c| c.order_hint.is_none()));
    }

    #[test]
    fn timing_polls_and_key_drops_query() {
        let timing = GeminiAdapter.timing();
        assert_eq!(timing.fallback_poll, Some(Duration::from_secs(3)));
        assert_eq!(timing.priming.attempts, 12);
        let url = Url::parse("https://gemini.google.com/app/9f8e?hl=en").expect("url");
        assert_eq!(GeminiAdapter.normalize_url(&url), "https://gemini.google.com/app/9f8e");
    }

    #[test]
    fn without_history_there_is_no_container() {
        let mut doc = Document::with_location("https://gemini.google.com/app").expect("doc");
        assert_eq!(GeminiAdapter.container(&doc).expect("container"), None);
        assert!(GeminiAdapter.detect_messages(&mut doc).expect("detect").is_empty());
    }
}
