//! # chatnav DOM
//!
//! In-process model of a host page: the tree a chat web application renders
//! and keeps rewriting underneath us.
//!
//! ## Pieces
//!
//! ```text
//! Document (generational node arena)
//!     │
//!     ├──> Selectors      query_all / closest / matches
//!     ├──> Text           text_content / inner_text
//!     ├──> Tree metrics   tree_distance / document order
//!     ├──> Geometry       rect_top / scroll containers
//!     └──> Observation    MutationObserver (tokio channel)
//! ```
//!
//! [`NodeId`] handles are weak: once the host removes a node every handle to
//! it reports `is_attached() == false`.

mod document;
mod error;
mod node;
mod observer;
mod selector;
mod snapshot;

pub use document::{Document, SharedDocument, DEFAULT_VIEWPORT_HEIGHT};
pub use error::{DomError, Result};
pub use node::{Layout, NodeId, Overflow};
pub use observer::{MutationKind, MutationObserver, MutationRecord, ObserveOptions};
pub use selector::Selector;
pub use snapshot::{DocumentSnapshot, NodeSnapshot};
pub use url::Url;
