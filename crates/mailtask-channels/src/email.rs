//! Email channel: SMTP sending via async lettre.
//!
//! Builds a `multipart/alternative` message whose HTML view is a
//! `multipart/related` part carrying the inline images, so the body can
//! reference them as `cid:<content-id>`.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailtask_core::config::MailConfig;
use mailtask_core::error::{MailTaskError, Result};
use mailtask_core::traits::MailTransport;
use mailtask_core::types::OutgoingMail;
use std::time::Duration;

/// SMTP transport for outgoing reports.
pub struct SmtpMailer {
    host: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the transport from mail settings. Nothing is sent or connected yet.
    pub fn new(config: &MailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if config.enable_ssl {
            let tls = TlsParameters::new(config.host.clone())
                .map_err(|e| MailTaskError::Transport(format!("TLS parameters: {e}")))?;
            builder = if config.port == 465 {
                builder.tls(Tls::Wrapper(tls))
            } else {
                builder.tls(Tls::Required(tls))
            };
        } else {
            builder = builder.tls(Tls::None);
        }

        if config.has_credentials() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        tracing::info!(
            "📧 SMTP transport: {}:{} (tls: {}, auth: {})",
            config.host,
            config.port,
            config.enable_ssl,
            config.has_credentials()
        );

        Ok(Self {
            host: config.host.clone(),
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let message = build_message(mail)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| MailTaskError::Transport(format!("SMTP send via {}: {e}", self.host)))?;

        tracing::debug!(
            "📤 Email accepted by {} ({} recipient(s), {} inline)",
            self.host,
            mail.recipient_count(),
            mail.inline.len()
        );
        Ok(())
    }
}

/// Compose the MIME message for an outgoing report.
pub fn build_message(mail: &OutgoingMail) -> Result<Message> {
    let from_address: Address = mail
        .from
        .email
        .parse()
        .map_err(|e| MailTaskError::Transport(format!("Invalid from '{}': {e}", mail.from.email)))?;
    let from = Mailbox::new(mail.from.name.clone(), from_address);

    let mut builder = Message::builder().from(from).subject(mail.subject.as_str());
    for addr in &mail.to {
        builder = builder.to(parse_mailbox(addr)?);
    }
    for addr in &mail.cc {
        builder = builder.cc(parse_mailbox(addr)?);
    }
    for addr in &mail.bcc {
        builder = builder.bcc(parse_mailbox(addr)?);
    }

    let mut related = MultiPart::related().singlepart(SinglePart::html(mail.html.clone()));
    for resource in &mail.inline {
        let content_type = ContentType::parse(&resource.content_type).map_err(|e| {
            MailTaskError::Transport(format!(
                "Invalid content type '{}' for cid '{}': {e}",
                resource.content_type, resource.content_id
            ))
        })?;
        related = related.singlepart(
            Attachment::new_inline(resource.content_id.clone())
                .body(resource.data.clone(), content_type),
        );
    }

    builder
        .multipart(MultiPart::alternative().multipart(related))
        .map_err(|e| MailTaskError::Transport(format!("Build email: {e}")))
}

fn parse_mailbox(addr: &str) -> Result<Mailbox> {
    addr.trim()
        .parse()
        .map_err(|e| MailTaskError::Transport(format!("Invalid recipient '{addr}': {e}")))
}
