//! Total order over the message sequence.
//!
//! Keys, most significant first: `order` when both sides have one and they
//! differ, document position when both elements are attached, detection
//! timestamp last. Equal keys keep their existing relative order.

use chatnav_dom::Document;
use std::cmp::Ordering;

use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub order: Option<u64>,
    /// Child-index path from the root; `None` when the element is gone.
    pub position: Option<Vec<usize>>,
    pub timestamp_ms: u64,
}

impl SortKey {
    pub fn of(message: &Message, doc: &Document) -> Self {
        Self {
            order: message.order,
            position: message
                .element
                .filter(|el| doc.is_attached(*el))
                .and_then(|el| doc.position_path(el)),
            timestamp_ms: message.timestamp_ms,
        }
    }
}

pub fn compare(a: &SortKey, b: &SortKey) -> Ordering {
    if let (Some(x), Some(y)) = (a.order, b.order) {
        if x != y {
            return x.cmp(&y);
        }
    }
    if let (Some(p), Some(q)) = (&a.position, &b.position) {
        match p.cmp(q) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.timestamp_ms.cmp(&b.timestamp_ms)
}

/// Sorts in place with [`compare`].
///
/// Insertion sort: the input is already sorted except for the tail a pass
/// appended, and mixed keys (some messages without `order`, some detached)
/// are not guaranteed to form a total order, which the std sorts reject.
pub fn sort_messages(messages: &mut Vec<Message>, doc: &Document) {
    if messages.len() < 2 {
        return;
    }
    let mut keyed: Vec<(SortKey, Message)> = messages
        .drain(..)
        .map(|m| (SortKey::of(&m, doc), m))
        .collect();
    for i in 1..keyed.len() {
        let mut j = i;
        while j > 0 && compare(&keyed[j - 1].0, &keyed[j].0) == Ordering::Greater {
            keyed.swap(j - 1, j);
            j -= 1;
        }
    }
    messages.extend(keyed.into_iter().map(|(_, m)| m));
}

/// Hands out `order` values strictly after everything seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderAllocator {
    max: Option<u64>,
}

impl OrderAllocator {
    pub fn observe(&mut self, order: Option<u64>) {
        if let Some(order) = order {
            self.max = Some(self.max.map_or(order, |max| max.max(order)));
        }
    }

    pub fn allocate(&mut self) -> u64 {
        let next = self.max.map_or(0, |max| max + 1);
        self.max = Some(next);
        next
    }

    pub fn max(&self) -> Option<u64> {
        self.max
    }

    pub fn reset(&mut self) {
        self.max = None;
    }
}
