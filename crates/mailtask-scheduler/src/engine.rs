//! Scheduler engine: the main loop that finds due mail tasks and runs them.
//! Sleeps between cycles; the sleep is the only point cancellation interrupts.

use std::sync::Arc;
use std::time::Duration;

use mailtask_core::error::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::processor::TaskProcessor;
use crate::store::MailStore;

/// Counts for one scheduling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub processed: usize,
    pub failed: usize,
}

pub struct SchedulerEngine {
    store: Arc<dyn MailStore>,
    processor: TaskProcessor,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn MailStore>,
        processor: TaskProcessor,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            processor,
            clock,
            interval,
        }
    }

    /// One cycle: acquire a session, fetch due tasks, process each in order.
    ///
    /// Returns `Err` only when the session or the due-task query fails. A
    /// failing task is logged and counted; the rest still run.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut session = self.store.session().await?;
        let tasks = session.due_tasks(self.clock.now()).await?;
        let mut report = CycleReport {
            due: tasks.len(),
            ..CycleReport::default()
        };
        if tasks.is_empty() {
            return Ok(report);
        }
        tracing::info!("🔔 {} due task(s)", tasks.len());

        for task in &tasks {
            if cancel.is_cancelled() {
                let left = report.due - report.processed - report.failed;
                tracing::info!("🛑 Cancelled, {left} task(s) left for the next run");
                break;
            }
            match self.processor.process(&mut *session, task).await {
                Ok(_) => report.processed += 1,
                Err(e) => {
                    tracing::error!("❌ Task '{}' ({}) aborted: {e}", task.name, task.id);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Run cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            "⏰ Scheduler started on {} store (check every {}s)",
            self.store.name(),
            self.interval.as_secs()
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_cycle(&cancel).await {
                Ok(report) if report.due > 0 => tracing::info!(
                    "📣 Cycle done: {} processed, {} failed",
                    report.processed,
                    report.failed
                ),
                Ok(_) => tracing::debug!("No due tasks"),
                Err(e) => tracing::error!("❌ Scheduling cycle failed: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("⏹️ Scheduler stopped");
    }
}

/// Spawn the scheduler loop as a background tokio task.
pub fn spawn_scheduler(engine: Arc<SchedulerEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move { engine.run(cancel).await })
}
