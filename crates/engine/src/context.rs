use chatnav_adapters::PlatformAdapter;
use chatnav_dom::NodeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dedup::MessageIndex;

/// Monotonic context counter shared with every task that outlives a pass.
#[derive(Debug, Clone, Default)]
pub struct ContextGeneration(Arc<AtomicU64>);

impl ContextGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidates every outstanding token and returns one for the new
    /// generation.
    pub fn advance(&self) -> ContextToken {
        let generation = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        ContextToken {
            generation,
            source: self.clone(),
        }
    }

    pub fn token(&self) -> ContextToken {
        ContextToken {
            generation: self.current(),
            source: self.clone(),
        }
    }
}

/// Proof that work was started for a particular context.
#[derive(Debug, Clone)]
pub struct ContextToken {
    generation: u64,
    source: ContextGeneration,
}

impl ContextToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.source.current() == self.generation
    }
}

/// All state of one conversation: created on navigation, torn down when the
/// normalized address changes.
pub struct ConversationContext {
    key: String,
    adapter: Arc<dyn PlatformAdapter>,
    token: ContextToken,
    pub(crate) index: MessageIndex,
    pub(crate) scroll_container: Option<NodeId>,
}

impl ConversationContext {
    pub fn new(key: String, adapter: Arc<dyn PlatformAdapter>, token: ContextToken) -> Self {
        Self {
            key,
            adapter,
            token,
            index: MessageIndex::new(),
            scroll_container: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn adapter(&self) -> &Arc<dyn PlatformAdapter> {
        &self.adapter
    }

    pub fn token(&self) -> &ContextToken {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.token.generation()
    }

    pub fn index(&self) -> &MessageIndex {
        &self.index
    }

    /// Same adapter and same conversation key.
    pub fn matches(&self, adapter: &str, key: &str) -> bool {
        self.adapter.name() == adapter && self.key == key
    }

    /// Drops the sequence and cached handles.
    pub fn teardown(&mut self) {
        self.index.clear();
        self.scroll_container = None;
    }
}

impl std::fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContext")
            .field("key", &self.key)
            .field("adapter", &self.adapter.name())
            .field("generation", &self.token.generation())
            .field("messages", &self.index.len())
            .finish()
    }
}
