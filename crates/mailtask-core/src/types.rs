//! Transport-neutral mail types.

/// Sender identity for every outgoing report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub name: Option<String>,
}

/// An image carried inside the message and referenced from the HTML body
/// as `cid:<content_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineResource {
    pub content_id: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A fully resolved message, ready for a [`crate::MailTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: Sender,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub inline: Vec<InlineResource>,
}

impl OutgoingMail {
    /// Total number of addressed recipients across To/Cc/Bcc.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Content-ids of the attached inline resources, in attachment order.
    pub fn content_ids(&self) -> Vec<&str> {
        self.inline.iter().map(|r| r.content_id.as_str()).collect()
    }
}
