//! Merging adapter output into the authoritative sequence.

use chatnav_adapters::{CandidateMessage, OrderPolicy};
use chatnav_dom::{Document, NodeId};
use log::debug;
use std::collections::HashSet;

use crate::config::{DedupConfig, EngineConfig};
use crate::message::{comparison_key, normalize_text, Message, MessageId};
use crate::ordering::{sort_messages, OrderAllocator};

/// What one merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Newly accepted ids, in acceptance order
    pub accepted: Vec<MessageId>,
    /// Known messages whose text grew or changed
    pub refreshed: usize,
    pub dropped_by_id: usize,
    pub dropped_near_duplicate: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.accepted.is_empty()
    }

    /// Anything a reader of the sequence would notice.
    pub fn touched(&self) -> bool {
        self.changed() || self.refreshed > 0
    }
}

/// The de-duplicated, ordered message sequence of one conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageIndex {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    orders: OrderAllocator,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Caches a re-located element for `id`.
    pub fn set_element(&mut self, id: &MessageId, element: NodeId) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.element = Some(element);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.orders.reset();
    }

    /// One detection pass worth of candidates, in the adapter's enumeration
    /// order.
    ///
    /// 1. candidates whose id is already known are dropped (their element
    ///    reference and text are refreshed);
    /// 2. near-duplicates of a same-role message are dropped;
    /// 3. under [`OrderPolicy::Renumber`] survivors are numbered after the
    ///    current maximum, keeping their relative sequence;
    /// 4. the rest is appended and the sequence re-sorted.
    pub fn merge(
        &mut self,
        candidates: Vec<CandidateMessage>,
        policy: OrderPolicy,
        doc: &Document,
        detected_at_ms: u64,
        config: &EngineConfig,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut fresh: Vec<Message> = Vec::new();
        let mut seen_this_pass: HashSet<MessageId> = HashSet::new();

        for (position, candidate) in candidates.into_iter().enumerate() {
            let full_content = normalize_text(&candidate.full_content);
            if full_content.is_empty() {
                continue;
            }
            let id = candidate
                .stable_id
                .filter(|id| !id.trim().is_empty())
                .map(MessageId::new)
                .unwrap_or_else(|| MessageId::from_content(candidate.role, position, &full_content));
            let element = candidate.element.filter(|el| doc.is_attached(*el));

            if self.ids.contains(&id) {
                outcome.dropped_by_id += 1;
                if self.refresh(&id, element, &full_content, config.preview_chars) {
                    outcome.refreshed += 1;
                }
                continue;
            }
            if !seen_this_pass.insert(id.clone()) {
                outcome.dropped_by_id += 1;
                continue;
            }
            fresh.push(Message {
                id,
                role: candidate.role,
                content: Message::preview_of(&full_content, config.preview_chars),
                full_content,
                order: match policy {
                    OrderPolicy::Native => candidate.order_hint,
                    OrderPolicy::Renumber => None,
                },
                timestamp_ms: detected_at_ms,
                element,
            });
        }

        for mut message in fresh {
            if let Some(original) = self.near_duplicate_of(&message, doc, &config.dedup) {
                debug!(
                    "dropping {} as a near-duplicate of {original} ({})",
                    message.id, message.role
                );
                outcome.dropped_near_duplicate += 1;
                continue;
            }
            if policy == OrderPolicy::Renumber {
                message.order = Some(self.orders.allocate());
            }
            self.orders.observe(message.order);
            self.ids.insert(message.id.clone());
            outcome.accepted.push(message.id.clone());
            self.messages.push(message);
        }

        if outcome.changed() {
            sort_messages(&mut self.messages, doc);
        }
        outcome
    }

    fn refresh(
        &mut self,
        id: &MessageId,
        element: Option<NodeId>,
        full_content: &str,
        preview_chars: usize,
    ) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| &m.id == id) else {
            return false;
        };
        if element.is_some() {
            message.element = element;
        }
        if message.full_content == full_content {
            return false;
        }
        message.full_content = full_content.to_string();
        message.content = Message::preview_of(full_content, preview_chars);
        true
    }

    fn near_duplicate_of(
        &self,
        candidate: &Message,
        doc: &Document,
        config: &DedupConfig,
    ) -> Option<&MessageId> {
        let live = |el: Option<NodeId>| el.filter(|e| doc.is_attached(*e));
        let candidate_el = live(candidate.element);
        let candidate_key = comparison_key(&candidate.full_content);

        for existing in self.messages.iter().filter(|m| m.role == candidate.role) {
            let existing_el = live(existing.element);
            let same_element = candidate_el.is_some() && candidate_el == existing_el;
            if same_element {
                return Some(&existing.id);
            }
            let existing_key = comparison_key(&existing.full_content);
            if candidate.order.is_some()
                && candidate.order == existing.order
                && existing_key == candidate_key
            {
                return Some(&existing.id);
            }
            if near_identical(&existing_key, &candidate_key, config) {
                let close = match (candidate_el, existing_el) {
                    (Some(a), Some(b)) => doc
                        .tree_distance(a, b)
                        .is_some_and(|hops| hops <= config.max_hops),
                    _ => false,
                };
                if close {
                    return Some(&existing.id);
                }
            }
        }
        None
    }
}

/// Equal, or in the same length class with the same leading characters.
pub fn near_identical(a: &str, b: &str, config: &DedupConfig) -> bool {
    if a == b {
        return true;
    }
    let bucket = config.length_bucket.max(1);
    if a.chars().count() / bucket != b.chars().count() / bucket {
        return false;
    }
    a.chars().take(config.prefix_chars).eq(b.chars().take(config.prefix_chars))
}
