//! # chatnav engine
//!
//! Keeps an ordered, de-duplicated list of the messages a chat page is
//! showing, while the page keeps re-rendering, streaming and navigating.
//!
//! ## Flow
//!
//! ```text
//!  navigate(url) ──> AdapterRegistry::select ──> ConversationContext (generation N)
//!                                                      │
//!  MutationObserver ──> SyncScheduler ──wake──> detection pass
//!   (debounce, streaming checks, priming)              │
//!                                                      ▼
//!                              MessageIndex::merge (id, near-duplicate, order)
//!                                                      │
//!                       watch<SequenceSnapshot> + broadcast<SequenceUpdate>
//!                                                      │
//!                      projection (filter, search, copy, export) / scroll
//! ```
//!
//! Everything that mutates state runs on the single task spawned by
//! [`SyncEngine::start`]. Delayed work carries the generation it was
//! scheduled under and is dropped once the conversation changed.

pub mod config;
pub mod context;
pub mod dedup;
pub mod driver;
pub mod error;
pub mod message;
pub mod ordering;
pub mod persistence;
pub mod projection;
pub mod scheduler;
pub mod scroll;

pub use config::{DedupConfig, EngineConfig, HighlightConfig, SchedulerConfig, ScrollConfig};
pub use context::{ContextGeneration, ContextToken, ConversationContext};
pub use dedup::{MergeOutcome, MessageIndex};
pub use driver::{EngineHealth, SequenceSnapshot, SequenceUpdate, SyncEngine, UiOutcome};
pub use error::{EngineError, Result};
pub use message::{Message, MessageId};
pub use persistence::{
    FavoritesSet, JsonFileSettingsStore, MemorySettingsStore, SettingsStore, StoredSettings,
};
pub use projection::{MessageFilter, ProjectedRow, ProjectionQuery, UiAction};
pub use scheduler::{Phase, ScanReason, SyncScheduler};
pub use scroll::{HighlightTracker, ScrollOutcome};
