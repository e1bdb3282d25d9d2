use thiserror::Error;

use crate::NodeId;

pub type Result<T> = std::result::Result<T, DomError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Node is detached or was removed: {0}")]
    Detached(NodeId),

    #[error("Node is not an element: {0}")]
    NotAnElement(NodeId),

    #[error("Reference node {reference} is not a child of {parent}")]
    NotAChild { parent: NodeId, reference: NodeId },

    #[error("The document root cannot be removed")]
    RootRemoval,

    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl DomError {
    pub fn invalid_selector(selector: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }
}
