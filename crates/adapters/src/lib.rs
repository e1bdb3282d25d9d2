//! # chatnav adapters
//!
//! One [`PlatformAdapter`] per chat host. An adapter is a pure function of
//! the current [`Document`](chatnav_dom::Document) to candidate messages,
//! plus timing and behavior hints for the scheduler.
//!
//! ```text
//! Url ──> AdapterRegistry::select ──> Arc<dyn PlatformAdapter>
//!                                          │
//!          Document ──> detect_messages ───┴──> Vec<CandidateMessage>
//! ```
//!
//! Registry priority: ChatGPT, Claude, Gemini, DeepSeek, Grok, Kimi, Qwen.

mod adapter;
mod error;
mod hosts;
mod registry;
mod types;

pub use adapter::{
    host_matches, squash_whitespace, strip_fragment, strip_query_and_fragment, PlatformAdapter,
    MARKER_ATTR, OWN_ATTR_PREFIX,
};
pub use error::{AdapterError, Result};
pub use hosts::{
    ChatGptAdapter, ClaudeAdapter, DeepSeekAdapter, GeminiAdapter, GrokAdapter, KimiAdapter,
    QwenAdapter,
};
pub use registry::AdapterRegistry;
pub use types::{AdapterTiming, CandidateMessage, MessageElement, OrderPolicy, PrimingPlan, Role};
