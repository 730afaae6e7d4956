//! Report rendering: run the task's procedure for one domain value and
//! inline the template stylesheet.

use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::NaiveDate;
use mailtask_core::error::Result;

use crate::store::StoreSession;
use crate::tasks::{DomainValue, MailTask, ReportDomain};

/// Marker in the procedure output replaced by the stylesheet.
pub const STYLE_PLACEHOLDER: &str = "@Estilos@";

pub struct ReportRenderer {
    styles_dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(styles_dir: impl Into<PathBuf>) -> Self {
        Self {
            styles_dir: styles_dir.into(),
        }
    }

    /// Produce the HTML body for one domain value.
    ///
    /// An unsupported domain fails before the procedure is called. Empty
    /// procedure output is logged and rendered as-is.
    pub async fn render(
        &self,
        session: &mut dyn StoreSession,
        task: &MailTask,
        value: &DomainValue,
        stylesheet: Option<&str>,
        as_of: NaiveDate,
    ) -> Result<String> {
        let domain: ReportDomain = value.domain.parse()?;
        let html = session
            .call_report(&task.report_procedure, domain, &value.value, as_of)
            .await?
            .unwrap_or_default();

        if html.trim().is_empty() {
            tracing::error!(
                "Report '{}' returned no HTML for task '{}' ({value})",
                task.report_procedure,
                task.name
            );
        }

        let css = match stylesheet {
            Some(name) => self.load_stylesheet(name).await?,
            None => String::new(),
        };
        Ok(apply_stylesheet(&html, &css))
    }

    /// Read a stylesheet; a missing file renders as an empty style block.
    async fn load_stylesheet(&self, name: &str) -> Result<String> {
        let path = self.styles_dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(css) => Ok(css),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("⚠️ Stylesheet not found: {}", path.display());
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Replace the first style placeholder with a `<style>` element.
pub fn apply_stylesheet(html: &str, css: &str) -> String {
    html.replacen(STYLE_PLACEHOLDER, &format!("<style>{css}</style>"), 1)
}
