use thiserror::Error;

use crate::logging::LoggingError;
use crate::proxy::{ContextId, ProxyId};

/// Unified result type for the application management core.
pub type Result<T> = std::result::Result<T, AmsError>;

/// Errors surfaced by the registry and the ambient layers.
///
/// Lifecycle requests themselves never fail with an error: they report
/// isolation failures through `bool` results and treat invalid transitions as
/// no-ops.
#[derive(Debug, Error)]
pub enum AmsError {
    #[error("proxy `{0}` not found")]
    ProxyNotFound(ProxyId),
    #[error("no proxy for context `{0}`")]
    ContextNotFound(ContextId),
    #[error("context `{0}` already has a live proxy")]
    DuplicateContext(ContextId),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("logging failure: {0}")]
    Logging(#[from] LoggingError),
    #[error("configuration decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
