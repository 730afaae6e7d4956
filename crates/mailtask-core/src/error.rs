//! Error types for MailTask.

use thiserror::Error;

/// Errors raised while scheduling, rendering, or dispatching mail tasks.
#[derive(Debug, Error)]
pub enum MailTaskError {
    /// Domain name with no report parameter mapping.
    #[error("Unsupported domain: {0}")]
    UnsupportedDomain(String),

    /// Message could not be built or the mail transport rejected it.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Any read or write against the task store.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MailTaskError>;
