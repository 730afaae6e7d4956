//! # MailTask Scheduler
//!
//! Recurring mail-report pipeline: find due tasks, render one report per
//! domain value, mail it with inline images, advance the schedule.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio sleep, cancellable)
//!   └── per cycle: one StoreSession
//!         └── per due task: TaskProcessor
//!               ├── per domain value: ReportRenderer → Dispatcher → MailTransport
//!               └── recurrence::next_send → complete_run (log rows + schedule, one transaction)
//!
//! Stores
//!   ├── SqliteStore (rusqlite, report procedures as stored queries)
//!   └── PgStore (sqlx, report procedures via CALL)
//! ```

pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod postgres;
pub mod processor;
pub mod recurrence;
pub mod render;
pub mod store;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use dispatch::Dispatcher;
pub use engine::{CycleReport, SchedulerEngine, spawn_scheduler};
pub use persistence::SqliteStore;
pub use postgres::PgStore;
pub use processor::{TaskProcessor, TaskRunSummary};
pub use render::ReportRenderer;
pub use store::{MailStore, StoreSession, open_store};
pub use tasks::{MailTask, Recurrence, Schedule};
