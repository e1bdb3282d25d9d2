use chatnav_dom::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message as an adapter sees it in the current tree. Nothing here is
/// authoritative until the engine merges it.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMessage {
    pub role: Role,
    pub full_content: String,
    /// Host-provided or marker-derived identifier that survives re-renders.
    pub stable_id: Option<String>,
    /// Host ordering signal, when the markup exposes one.
    pub order_hint: Option<u64>,
    pub element: Option<NodeId>,
}

impl CandidateMessage {
    pub fn new(role: Role, full_content: impl Into<String>) -> Self {
        Self {
            role,
            full_content: full_content.into(),
            stable_id: None,
            order_hint: None,
            element: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.stable_id = Some(id.into());
        self
    }

    pub fn with_order(mut self, order: u64) -> Self {
        self.order_hint = Some(order);
        self
    }

    pub fn with_element(mut self, element: NodeId) -> Self {
        self.element = Some(element);
        self
    }
}

/// A message element found by an adapter's selector cascade, before text
/// extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageElement {
    pub role: Role,
    pub element: NodeId,
    pub host_id: Option<String>,
    pub order_hint: Option<u64>,
}

impl MessageElement {
    pub fn new(role: Role, element: NodeId) -> Self {
        Self {
            role,
            element,
            host_id: None,
            order_hint: None,
        }
    }
}

/// Bounded burst of detection attempts right after navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimingPlan {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PrimingPlan {
    fn default() -> Self {
        Self {
            attempts: 8,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl PrimingPlan {
    /// Delay after an attempt that found nothing: grows by half, capped.
    pub fn escalate(&self, current: Duration) -> Duration {
        (current + current / 2).min(self.max_delay)
    }
}

/// Per-host timing hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterTiming {
    pub debounce: Duration,
    pub streaming_wait: Duration,
    pub priming: PrimingPlan,
    /// Fixed-period rescan for hosts whose mutations are unreliable.
    pub fallback_poll: Option<Duration>,
}

impl Default for AdapterTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            streaming_wait: Duration::from_millis(2000),
            priming: PrimingPlan::default(),
            fallback_poll: None,
        }
    }
}

/// Whether host ordering can be trusted or new messages are numbered after
/// everything already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderPolicy {
    #[default]
    Native,
    Renumber,
}
