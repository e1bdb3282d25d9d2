//! What the sidebar shows and what it may ask for.
//!
//! The UI renders `(sequence, favorites)` through a `(filter, search)`
//! projection and only ever emits [`UiAction`]s carrying a message id.

use chatnav_adapters::Role;
use chatnav_dom::{Document, NodeId};
use serde::{Deserialize, Serialize};

use crate::message::{normalize_text, Message, MessageId};
use crate::persistence::FavoritesSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFilter {
    #[default]
    All,
    User,
    Assistant,
    Favorites,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionQuery {
    pub filter: MessageFilter,
    /// Case-insensitive substring of the full text; blank matches all.
    pub search: String,
}

impl ProjectionQuery {
    pub fn new(filter: MessageFilter, search: impl Into<String>) -> Self {
        Self {
            filter,
            search: search.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedRow {
    pub id: MessageId,
    /// 1-based position in the unfiltered sequence
    pub number: usize,
    pub role: Role,
    pub preview: String,
    pub favorite: bool,
}

/// Requests the UI can make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "id", rename_all = "snake_case")]
pub enum UiAction {
    ScrollTo(MessageId),
    Copy(MessageId),
    ToggleFavorite(MessageId),
}

impl UiAction {
    pub fn message_id(&self) -> &MessageId {
        match self {
            UiAction::ScrollTo(id) | UiAction::Copy(id) | UiAction::ToggleFavorite(id) => id,
        }
    }
}

pub fn project(messages: &[Message], favorites: &FavoritesSet, query: &ProjectionQuery) -> Vec<ProjectedRow> {
    let needle = query.search.trim().to_lowercase();
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| match query.filter {
            MessageFilter::All => true,
            MessageFilter::User => m.role == Role::User,
            MessageFilter::Assistant => m.role == Role::Assistant,
            MessageFilter::Favorites => favorites.contains(&m.id),
        })
        .filter(|(_, m)| needle.is_empty() || m.full_content.to_lowercase().contains(&needle))
        .map(|(idx, m)| ProjectedRow {
            id: m.id.clone(),
            number: idx + 1,
            role: m.role,
            preview: m.content.clone(),
            favorite: favorites.contains(&m.id),
        })
        .collect()
}

pub fn heading(number: usize, role: Role, assistant_name: &str) -> String {
    match role {
        Role::User => format!("{number}. You"),
        Role::Assistant => format!("{number}. {assistant_name}"),
    }
}

/// Clipboard text for one message: heading line, then the normalized text.
pub fn clipboard_text(messages: &[Message], id: &MessageId, assistant_name: &str) -> Option<String> {
    let (idx, message) = messages.iter().enumerate().find(|(_, m)| &m.id == id)?;
    Some(format!(
        "{}\n{}",
        heading(idx + 1, message.role, assistant_name),
        normalize_text(&message.full_content)
    ))
}

/// Whole conversation as markdown, one section per message.
pub fn transcript_markdown(messages: &[Message], assistant_name: &str) -> String {
    let mut out = String::new();
    for (idx, message) in messages.iter().enumerate() {
        if idx > 0 {
            out.push_str("\n\n");
        }
        out.push_str("## ");
        out.push_str(&heading(idx + 1, message.role, assistant_name));
        out.push_str("\n\n");
        out.push_str(&normalize_text(&message.full_content));
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// The message whose element sits closest to the anchor line of
/// `container` (a fraction of its visible height from the top).
pub fn visible_message(
    doc: &Document,
    messages: &[Message],
    container: NodeId,
    anchor_ratio: f64,
) -> Option<MessageId> {
    let layout = doc.layout(container)?;
    let anchor = doc.rect_top(container)? + layout.client_height * anchor_ratio;
    messages
        .iter()
        .filter_map(|m| {
            let element = m.element.filter(|el| doc.contains(container, *el))?;
            let top = doc.rect_top(element)?;
            Some(((top - anchor).abs(), &m.id))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, id)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatnav_dom::Layout;
    use pretty_assertions::assert_eq;

    fn message(id: &str, role: Role, text: &str) -> Message {
        Message {
            id: MessageId::new(id),
            role,
            content: Message::preview_of(text, 120),
            full_content: text.to_string(),
            order: None,
            timestamp_ms: 0,
            element: None,
        }
    }

    fn sample() -> Vec<Message> {
        vec![
            message("q1", Role::User, "How do I parse JSON?"),
            message("a1", Role::Assistant, "Use serde_json.\n\n\n\nIt is fast."),
            message("q2", Role::User, "And TOML?"),
        ]
    }

    #[test]
    fn filters_and_search_compose() {
        let messages = sample();
        let mut favorites = FavoritesSet::default();
        favorites.toggle(&MessageId::new("a1"));

        let users = project(&messages, &favorites, &ProjectionQuery::new(MessageFilter::User, ""));
        assert_eq!(
            users.iter().map(|r| r.number).collect::<Vec<_>>(),
            vec![1, 3]
        );

        let starred = project(&messages, &favorites, &ProjectionQuery::new(MessageFilter::Favorites, ""));
        assert_eq!(starred.len(), 1);
        assert!(starred[0].favorite);

        let search = project(&messages, &favorites, &ProjectionQuery::new(MessageFilter::All, "  SERDE "));
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].id.as_str(), "a1");
    }

    #[test]
    fn clipboard_uses_position_and_assistant_name() {
        let messages = sample();
        assert_eq!(
            clipboard_text(&messages, &MessageId::new("a1"), "Claude").as_deref(),
            Some("2. Claude\nUse serde_json.\n\nIt is fast.")
        );
        assert_eq!(
            clipboard_text(&messages, &MessageId::new("q2"), "Claude").as_deref(),
            Some("3. You\nAnd TOML?")
        );
        assert_eq!(clipboard_text(&messages, &MessageId::new("nope"), "Claude"), None);
    }

    #[test]
    fn transcript_has_one_section_per_message() {
        let markdown = transcript_markdown(&sample()[..2], "ChatGPT");
        assert_eq!(
            markdown,
            "## 1. You\n\nHow do I parse JSON?\n\n## 2. ChatGPT\n\nUse serde_json.\n\nIt is fast.\n"
        );
    }

    #[test]
    fn visible_message_is_nearest_the_anchor() {
        let mut doc = Document::new();
        let body = doc.body();
        let scroller = doc.append_element(body, "div").expect("append");
        let mut layout = Layout::scroller(0.0, 500.0, 3000.0);
        layout.scroll_top = 1000.0;
        doc.set_layout(scroller, layout).expect("layout");
        let mut messages = sample();
        for (i, m) in messages.iter_mut().enumerate() {
            let el = doc.append_element(scroller, "p").expect("append");
            doc.set_layout(el, Layout::block(900.0 + 150.0 * i as f64, 150.0))
                .expect("layout");
            m.element = Some(el);
        }
        // anchor at 75px; tops are -100, 50, 200
        assert_eq!(
            visible_message(&doc, &messages, scroller, 0.15).map(|id| id.to_string()),
            Some("a1".to_string())
        );
    }

    #[test]
    fn ui_actions_serialize_with_id() {
        let action = UiAction::ToggleFavorite(MessageId::new("a1"));
        assert_eq!(
            serde_json::to_string(&action).expect("json"),
            r#"{"action":"toggle_favorite","id":"a1"}"#
        );
        assert_eq!(action.message_id().as_str(), "a1");
    }
}
