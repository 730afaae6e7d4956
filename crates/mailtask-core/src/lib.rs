//! # MailTask Core
//!
//! Shared building blocks for the MailTask daemon: configuration, the error
//! type, and the transport-neutral mail types handed from the scheduler to a
//! mail transport.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MailTaskConfig;
pub use error::{MailTaskError, Result};
pub use traits::MailTransport;
pub use types::{InlineResource, OutgoingMail, Sender};
