//! Seams between the scheduler core and its external collaborators.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::OutgoingMail;

/// Mail transport: sends one composed message.
///
/// Implementations must not return until the message has been accepted or
/// rejected; a rejection is reported as [`crate::MailTaskError::Transport`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name (for logging).
    fn name(&self) -> &str;

    /// Send the message.
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}
