//! Task processor. Runs one due task by fanning out over its domain values,
//! then advances its schedule and writes the run log.

use std::sync::Arc;

use chrono::NaiveDateTime;
use mailtask_core::error::Result;

use crate::clock::Clock;
use crate::dispatch::Dispatcher;
use crate::recurrence;
use crate::render::ReportRenderer;
use crate::store::StoreSession;
use crate::tasks::{DomainValue, EmbeddedImage, MailTask, RecipientBinding, RunLogEntry};

/// Log message for a task with nothing to fan out over.
pub const NO_DOMAIN_VALUES: &str = "no active domain values";

/// Outcome of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunSummary {
    pub task_id: i64,
    /// Domain values dispatched successfully.
    pub sent: usize,
    /// Domain values whose render or dispatch failed.
    pub failed: usize,
    pub next_send: NaiveDateTime,
}

pub struct TaskProcessor {
    renderer: ReportRenderer,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl TaskProcessor {
    pub fn new(renderer: ReportRenderer, dispatcher: Dispatcher, clock: Arc<dyn Clock>) -> Self {
        Self {
            renderer,
            dispatcher,
            clock,
        }
    }

    /// Process one due task.
    ///
    /// Domain-value failures are logged and recorded; they never stop the
    /// fan-out. A store failure aborts the task before anything is written,
    /// leaving it due for the next cycle.
    pub async fn process(
        &self,
        session: &mut dyn StoreSession,
        task: &MailTask,
    ) -> Result<TaskRunSummary> {
        let recipients = session.recipients(task.id).await?;
        let images = session.embedded_images(task.template_id).await?;
        let stylesheet = session.stylesheet_name(task.template_id).await?;
        let values = session.domain_values(task.id).await?;

        tracing::info!(
            "📋 Task '{}' ({}): {} domain value(s), {} recipient(s), {} image(s)",
            task.name,
            task.id,
            values.len(),
            recipients.len(),
            images.len()
        );

        let mut entries = Vec::with_capacity(values.len().max(1));
        let mut sent = 0;
        for value in &values {
            let outcome = self
                .send_one(session, task, value, stylesheet.as_deref(), &recipients, &images)
                .await;
            let logged_at = self.clock.now();
            match outcome {
                Ok(()) => {
                    tracing::info!("✅ Task '{}' sent for {value}", task.name);
                    entries.push(RunLogEntry::success(task.id, "OK", logged_at));
                    sent += 1;
                }
                Err(e) => {
                    tracing::error!("❌ Task '{}' failed for {value}: {e}", task.name);
                    entries.push(RunLogEntry::failure(task.id, format!("{value}: {e}"), logged_at));
                }
            }
        }
        if values.is_empty() {
            entries.push(RunLogEntry::success(task.id, NO_DOMAIN_VALUES, self.clock.now()));
        }

        let now = self.clock.now();
        let next_send = recurrence::next_send(&task.schedule, now);
        session.complete_run(task.id, &entries, now, next_send).await?;

        tracing::info!(
            "📅 Task '{}' next send: {next_send} ({} {})",
            task.name,
            task.schedule.kind.code(),
            if sent == values.len() { "ok" } else { "with failures" }
        );

        Ok(TaskRunSummary {
            task_id: task.id,
            sent,
            failed: values.len() - sent,
            next_send,
        })
    }

    async fn send_one(
        &self,
        session: &mut dyn StoreSession,
        task: &MailTask,
        value: &DomainValue,
        stylesheet: Option<&str>,
        recipients: &[RecipientBinding],
        images: &[EmbeddedImage],
    ) -> Result<()> {
        let as_of = self.clock.now().date();
        let html = self
            .renderer
            .render(session, task, value, stylesheet, as_of)
            .await?;
        self.dispatcher.dispatch(html, recipients, images).await
    }
}
