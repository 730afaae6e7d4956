//! Mail dispatch: turns a rendered report plus the task's recipients and
//! images into one outgoing message and hands it to the transport.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use mailtask_core::error::Result;
use mailtask_core::traits::MailTransport;
use mailtask_core::types::{InlineResource, OutgoingMail, Sender};

use crate::tasks::{DeliveryKind, EmbeddedImage, RecipientBinding};

pub struct Dispatcher {
    sender: Sender,
    subject: String,
    transport: Arc<dyn MailTransport>,
}

impl Dispatcher {
    pub fn new(sender: Sender, subject: impl Into<String>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            sender,
            subject: subject.into(),
            transport,
        }
    }

    /// Send one message for one domain value.
    ///
    /// Images whose file is missing are skipped with a warning; any other
    /// read error fails the send.
    pub async fn dispatch(
        &self,
        html: String,
        recipients: &[RecipientBinding],
        images: &[EmbeddedImage],
    ) -> Result<()> {
        let mail = self.compose(html, recipients, images).await?;
        tracing::debug!(
            "📨 Dispatching via {} to {} recipient(s), inline: {:?}",
            self.transport.name(),
            mail.recipient_count(),
            mail.content_ids()
        );
        self.transport.send(&mail).await
    }

    async fn compose(
        &self,
        html: String,
        recipients: &[RecipientBinding],
        images: &[EmbeddedImage],
    ) -> Result<OutgoingMail> {
        let mut mail = OutgoingMail {
            from: self.sender.clone(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: self.subject.clone(),
            html,
            inline: Vec::with_capacity(images.len()),
        };

        for recipient in recipients {
            let list = match recipient.kind {
                DeliveryKind::To => &mut mail.to,
                DeliveryKind::Cc => &mut mail.cc,
                DeliveryKind::Bcc => &mut mail.bcc,
            };
            list.push(recipient.email.clone());
        }

        for image in images {
            if let Some(resource) = load_image(image).await? {
                mail.inline.push(resource);
            }
        }
        Ok(mail)
    }
}

async fn load_image(image: &EmbeddedImage) -> Result<Option<InlineResource>> {
    let path = Path::new(&image.file_path);
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(InlineResource {
            content_id: image.content_id.clone(),
            content_type: mime_for_path(path).to_string(),
            data,
        })),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(
                "⚠️ Image '{}' not found at {}, skipping",
                image.content_id,
                path.display()
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Media type from the file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;

    fn sender() -> Sender {
        Sender {
            email: "reports@example.com".into(),
            name: Some("Reports".into()),
        }
    }

    fn image(content_id: &str, path: &Path) -> EmbeddedImage {
        EmbeddedImage {
            content_id: content_id.into(),
            file_path: path.display().to_string(),
            image_kind: "NORMAL".into(),
        }
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("logo.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("a/b.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("chart.Jpg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("chart.gif")), "application/octet-stream");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_dispatch_routes_recipients() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Dispatcher::new(sender(), "Reporte Automático", transport.clone());
        let recipients = vec![
            RecipientBinding { email: "a@example.com".into(), kind: DeliveryKind::To },
            RecipientBinding { email: "b@example.com".into(), kind: DeliveryKind::Cc },
            RecipientBinding { email: "c@example.com".into(), kind: DeliveryKind::Bcc },
            RecipientBinding { email: "d@example.com".into(), kind: DeliveryKind::To },
        ];
        dispatcher
            .dispatch("<p>hi</p>".into(), &recipients, &[])
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@example.com", "d@example.com"]);
        assert_eq!(sent[0].cc, vec!["b@example.com"]);
        assert_eq!(sent[0].bcc, vec!["c@example.com"]);
        assert_eq!(sent[0].subject, "Reporte Automático");
        assert_eq!(sent[0].html, "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_dispatch_skips_missing_image() {
        let dir = std::env::temp_dir().join("mailtask-dispatch-images");
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(dir.join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
        std::fs::write(dir.join("chart.jpg"), [0xff, 0xd8]).unwrap();

        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Dispatcher::new(sender(), "Report", transport.clone());
        let recipients = vec![RecipientBinding {
            email: "a@example.com".into(),
            kind: DeliveryKind::To,
        }];
        let images = vec![
            image("logo", &dir.join("logo.png")),
            image("gone", &dir.join("gone.png")),
            image("chart", &dir.join("chart.jpg")),
        ];
        dispatcher
            .dispatch("<img src=\"cid:logo\">".into(), &recipients, &images)
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].content_ids(), vec!["logo", "chart"]);
        assert_eq!(sent[0].inline[0].content_type, "image/png");
        assert_eq!(sent[0].inline[1].content_type, "image/jpeg");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_dispatch_propagates_transport_failure() {
        let transport = Arc::new(RecordingTransport::failing("relay refused"));
        let dispatcher = Dispatcher::new(sender(), "Report", transport.clone());
        let err = dispatcher.dispatch("<p/>".into(), &[], &[]).await.unwrap_err();
        assert!(err.to_string().contains("relay refused"));
    }
}
