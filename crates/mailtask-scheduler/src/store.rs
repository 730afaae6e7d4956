//! Store interface: everything the scheduler reads from or writes to the
//! relational store, plus the report procedure that lives there.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use mailtask_core::config::{DaemonConfig, expand_path, is_safe_identifier};
use mailtask_core::error::{MailTaskError, Result};

use crate::persistence::SqliteStore;
use crate::postgres::PgStore;
use crate::tasks::{DomainValue, EmbeddedImage, MailTask, RecipientBinding, ReportDomain, RunLogEntry};

/// Task store. Hands out one session (connection) per scheduling cycle.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Backend name (for logging).
    fn name(&self) -> &str;

    /// Acquire the connection used for a whole cycle.
    async fn session(&self) -> Result<Box<dyn StoreSession>>;
}

/// One store connection, reused across every task and domain value of a cycle.
#[async_trait]
pub trait StoreSession: Send {
    /// Active tasks whose next-send is unset or at/before `now`.
    async fn due_tasks(&mut self, now: NaiveDateTime) -> Result<Vec<MailTask>>;

    async fn recipients(&mut self, task_id: i64) -> Result<Vec<RecipientBinding>>;

    async fn embedded_images(&mut self, template_id: i64) -> Result<Vec<EmbeddedImage>>;

    /// Active domain values only.
    async fn domain_values(&mut self, task_id: i64) -> Result<Vec<DomainValue>>;

    /// Stylesheet file name of a template, if any.
    async fn stylesheet_name(&mut self, template_id: i64) -> Result<Option<String>>;

    /// Run a report procedure for one domain value. `None` when the
    /// procedure produced no output.
    async fn call_report(
        &mut self,
        procedure: &str,
        domain: ReportDomain,
        value: &str,
        as_of: NaiveDate,
    ) -> Result<Option<String>>;

    /// Append the run-log rows and set `last_sent`/`next_send`, atomically.
    async fn complete_run(
        &mut self,
        task_id: i64,
        entries: &[RunLogEntry],
        sent_at: NaiveDateTime,
        next_send: NaiveDateTime,
    ) -> Result<()>;
}

/// Physical table names, each carrying the configured prefix.
#[derive(Debug, Clone)]
pub struct Tables {
    pub tasks: String,
    pub recipients: String,
    pub delivery_kinds: String,
    pub task_recipients: String,
    pub templates: String,
    pub images: String,
    pub domain_values: String,
    pub log: String,
    pub report_procedures: String,
}

impl Tables {
    /// Build the table names; the prefix is spliced into SQL, so it is validated.
    pub fn new(prefix: &str) -> Result<Self> {
        if !prefix.is_empty() && !is_safe_identifier(prefix) {
            return Err(MailTaskError::Config(format!("Invalid table prefix '{prefix}'")));
        }
        let t = |name: &str| format!("{prefix}{name}");
        Ok(Self {
            tasks: t("mail_tasks"),
            recipients: t("mail_recipients"),
            delivery_kinds: t("delivery_kinds"),
            task_recipients: t("mail_task_recipients"),
            templates: t("mail_templates"),
            images: t("mail_embedded_images"),
            domain_values: t("mail_task_domain_values"),
            log: t("mail_task_log"),
            report_procedures: t("report_procedures"),
        })
    }
}

/// Open the store named by `daemon.connection`.
pub async fn open_store(config: &DaemonConfig) -> Result<Arc<dyn MailStore>> {
    let connection = config.connection.trim();
    if connection.starts_with("postgres://") || connection.starts_with("postgresql://") {
        let store = PgStore::connect(connection, &config.table_prefix).await?;
        return Ok(Arc::new(store));
    }
    if let Some(path) = connection.strip_prefix("sqlite://") {
        let store = SqliteStore::open(&expand_path(path), &config.table_prefix)?;
        return Ok(Arc::new(store));
    }
    Err(MailTaskError::Config(format!(
        "Unsupported connection string '{connection}' (expected sqlite:// or postgres://)"
    )))
}
