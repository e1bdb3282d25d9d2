use tokio::sync::mpsc;

use crate::NodeId;

/// What a [`MutationObserver`] wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            child_list: true,
            attributes: false,
            character_data: false,
            subtree: true,
        }
    }
}

impl ObserveOptions {
    pub fn with_attributes(mut self, enabled: bool) -> Self {
        self.attributes = enabled;
        self.character_data = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList { added: usize, removed: usize },
    Attribute { name: String },
    CharacterData,
}

/// One structural change. `target` is the parent for child-list changes and
/// the changed node otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

impl MutationRecord {
    pub fn attribute_name(&self) -> Option<&str> {
        match &self.kind {
            MutationKind::Attribute { name } => Some(name),
            _ => None,
        }
    }
}

pub(crate) struct ObserverEntry {
    pub target: NodeId,
    pub options: ObserveOptions,
    pub sender: mpsc::UnboundedSender<MutationRecord>,
}

impl ObserverEntry {
    pub fn wants(&self, record: &MutationRecord) -> bool {
        match record.kind {
            MutationKind::ChildList { .. } => self.options.child_list,
            MutationKind::Attribute { .. } => self.options.attributes,
            MutationKind::CharacterData => self.options.character_data,
        }
    }
}

/// Live subscription to changes under a node. Dropping it unsubscribes.
#[derive(Debug)]
pub struct MutationObserver {
    target: NodeId,
    receiver: mpsc::UnboundedReceiver<MutationRecord>,
}

impl MutationObserver {
    pub(crate) fn new(target: NodeId, receiver: mpsc::UnboundedReceiver<MutationRecord>) -> Self {
        Self { target, receiver }
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Waits for the next record. Returns `None` once the document is gone.
    pub async fn recv(&mut self) -> Option<MutationRecord> {
        self.receiver.recv().await
    }

    /// Drains everything that is already queued.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        let mut out = Vec::new();
        while let Ok(record) = self.receiver.try_recv() {
            out.push(record);
        }
        out
    }
}
