use chatnav_dom::Url;
use std::sync::Arc;

use crate::adapter::PlatformAdapter;
use crate::error::{AdapterError, Result};
use crate::hosts::{
    ChatGptAdapter, ClaudeAdapter, DeepSeekAdapter, GeminiAdapter, GrokAdapter, KimiAdapter,
    QwenAdapter,
};

/// Adapters in priority order. At most one is active for a location: the
/// first whose `is_active` accepts it.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn PlatformAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn with_builtin() -> Self {
        Self::new(vec![
            Arc::new(ChatGptAdapter),
            Arc::new(ClaudeAdapter),
            Arc::new(GeminiAdapter),
            Arc::new(DeepSeekAdapter),
            Arc::new(GrokAdapter),
            Arc::new(KimiAdapter),
            Arc::new(QwenAdapter),
        ])
    }

    pub fn select(&self, location: &Url) -> Option<Arc<dyn PlatformAdapter>> {
        let selected = self.adapters.iter().find(|a| a.is_active(location)).cloned();
        match &selected {
            Some(adapter) => log::debug!("{location}: using adapter {}", adapter.name()),
            None => log::debug!("{location}: no adapter is active"),
        }
        selected
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownAdapter(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PlatformAdapter>> {
        self.adapters.iter()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.adapters.iter().map(|a| a.name()))
            .finish()
    }
}
