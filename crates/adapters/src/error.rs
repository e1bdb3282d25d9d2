use chatnav_dom::DomError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdapterError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("{adapter}: unexpected markup: {detail}")]
    Markup {
        adapter: &'static str,
        detail: String,
    },

    #[error("No adapter named `{0}`")]
    UnknownAdapter(String),
}

impl AdapterError {
    pub fn markup(adapter: &'static str, detail: impl Into<String>) -> Self {
        Self::Markup {
            adapter,
            detail: detail.into(),
        }
    }
}
