//! # MailTask Channels
//!
//! Mail transport implementations. The scheduler only sees the
//! [`mailtask_core::MailTransport`] trait; this crate turns an
//! [`mailtask_core::OutgoingMail`] into MIME and puts it on the wire.

pub mod email;

pub use email::SmtpMailer;
