use chatnav_adapters::AdapterError;
use chatnav_dom::DomError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Sync engine has shut down")]
    ShutDown,

    #[error("{0}")]
    Other(String),
}
