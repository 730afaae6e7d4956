//! In-memory fakes for scheduler tests: store, transport, and clock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use mailtask_core::error::{MailTaskError, Result};
use mailtask_core::traits::MailTransport;
use mailtask_core::types::{OutgoingMail, Sender};

use crate::clock::Clock;
use crate::store::{MailStore, StoreSession};
use crate::tasks::{
    DeliveryKind, DomainValue, EmbeddedImage, MailTask, RecipientBinding, ReportDomain,
    RunLogEntry, Schedule,
};

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

pub fn sample_task(id: i64) -> MailTask {
    MailTask {
        id,
        template_id: 1,
        name: format!("report-{id}"),
        report_procedure: "sp_report".into(),
        schedule: Schedule::default(),
        active: true,
        last_sent: None,
        next_send: None,
    }
}

pub fn test_sender() -> Sender {
    Sender {
        email: "reports@example.com".into(),
        name: Some("Reports".into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportCall {
    pub procedure: String,
    pub domain: ReportDomain,
    pub value: String,
    pub as_of: NaiveDate,
}

#[derive(Default)]
struct State {
    tasks: Vec<MailTask>,
    recipients: Vec<(i64, RecipientBinding)>,
    images: Vec<(i64, EmbeddedImage)>,
    domain_values: Vec<(i64, DomainValue)>,
    stylesheets: HashMap<i64, String>,
    reports: HashMap<(ReportDomain, String), String>,
    report_calls: Vec<ReportCall>,
    log: Vec<RunLogEntry>,
    failing_ops: HashSet<String>,
    failing_once: HashSet<String>,
    failing_runs: HashSet<i64>,
    sessions: usize,
    completed_runs: usize,
}

/// Store kept entirely in memory; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> MemorySession {
        self.state.lock().unwrap().sessions += 1;
        MemorySession {
            state: self.state.clone(),
        }
    }

    pub fn add_task(&self, task: MailTask) {
        self.state.lock().unwrap().tasks.push(task);
    }

    pub fn add_recipient(&self, task_id: i64, email: &str, kind: DeliveryKind) {
        self.state.lock().unwrap().recipients.push((
            task_id,
            RecipientBinding {
                email: email.into(),
                kind,
            },
        ));
    }

    pub fn add_image(&self, template_id: i64, content_id: &str, file_path: &str) {
        self.state.lock().unwrap().images.push((
            template_id,
            EmbeddedImage {
                content_id: content_id.into(),
                file_path: file_path.into(),
                image_kind: "NORMAL".into(),
            },
        ));
    }

    pub fn add_domain_value(&self, task_id: i64, domain: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .domain_values
            .push((task_id, DomainValue::new(domain, value)));
    }

    pub fn set_stylesheet(&self, template_id: i64, name: &str) {
        self.state
            .lock()
            .unwrap()
            .stylesheets
            .insert(template_id, name.into());
    }

    /// Output of the report procedure for one domain value.
    pub fn set_report(&self, domain: &str, value: &str, html: &str) {
        let domain: ReportDomain = domain.parse().unwrap();
        self.state
            .lock()
            .unwrap()
            .reports
            .insert((domain, value.into()), html.into());
    }

    /// Make every call of the named session operation fail with a store error.
    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().failing_ops.insert(op.into());
    }

    /// Fail the next call to `op` only.
    pub fn fail_once(&self, op: &str) {
        self.state.lock().unwrap().failing_once.insert(op.into());
    }

    pub fn fail_complete_run_for(&self, task_id: i64) {
        self.state.lock().unwrap().failing_runs.insert(task_id);
    }

    pub fn task(&self, id: i64) -> Option<MailTask> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    pub fn run_log(&self, task_id: i64) -> Vec<RunLogEntry> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn report_calls(&self) -> Vec<ReportCall> {
        self.state.lock().unwrap().report_calls.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().sessions
    }

    pub fn completed_runs(&self) -> usize {
        self.state.lock().unwrap().completed_runs
    }
}

#[async_trait]
impl MailStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(self.open()))
    }
}

pub struct MemorySession {
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    fn check(&self, op: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_ops.contains(op) || state.failing_once.remove(op) {
            return Err(MailTaskError::Store(format!("{op}: connection reset")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn due_tasks(&mut self, now: NaiveDateTime) -> Result<Vec<MailTask>> {
        self.check("due_tasks")?;
        let state = self.state.lock().unwrap();
        Ok(state.tasks.iter().filter(|t| t.is_due(now)).cloned().collect())
    }

    async fn recipients(&mut self, task_id: i64) -> Result<Vec<RecipientBinding>> {
        self.check("recipients")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .recipients
            .iter()
            .filter(|(id, _)| *id == task_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn embedded_images(&mut self, template_id: i64) -> Result<Vec<EmbeddedImage>> {
        self.check("embedded_images")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|(id, _)| *id == template_id)
            .map(|(_, i)| i.clone())
            .collect())
    }

    async fn domain_values(&mut self, task_id: i64) -> Result<Vec<DomainValue>> {
        self.check("domain_values")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .domain_values
            .iter()
            .filter(|(id, _)| *id == task_id)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn stylesheet_name(&mut self, template_id: i64) -> Result<Option<String>> {
        self.check("stylesheet_name")?;
        Ok(self.state.lock().unwrap().stylesheets.get(&template_id).cloned())
    }

    async fn call_report(
        &mut self,
        procedure: &str,
        domain: ReportDomain,
        value: &str,
        as_of: NaiveDate,
    ) -> Result<Option<String>> {
        self.check("call_report")?;
        let mut state = self.state.lock().unwrap();
        state.report_calls.push(ReportCall {
            procedure: procedure.into(),
            domain,
            value: value.into(),
            as_of,
        });
        Ok(state.reports.get(&(domain, value.to_string())).cloned())
    }

    async fn complete_run(
        &mut self,
        task_id: i64,
        entries: &[RunLogEntry],
        sent_at: NaiveDateTime,
        next_send: NaiveDateTime,
    ) -> Result<()> {
        self.check("complete_run")?;
        let mut state = self.state.lock().unwrap();
        if state.failing_runs.contains(&task_id) {
            return Err(MailTaskError::Store(format!("Task {task_id}: deadlock detected")));
        }
        let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Err(MailTaskError::Store(format!("Task {task_id} no longer exists")));
        };
        task.last_sent = Some(sent_at);
        task.next_send = Some(next_send);
        state.log.extend_from_slice(entries);
        state.completed_runs += 1;
        Ok(())
    }
}

/// Transport that records every message instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMail>>,
    failure: Option<String>,
    advance: Mutex<Option<(Arc<FixedClock>, Duration)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that rejects every message with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Move `clock` forward by `step` on every send attempt.
    pub fn advance_on_send(&self, clock: Arc<FixedClock>, step: Duration) {
        *self.advance.lock().unwrap() = Some((clock, step));
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if let Some((clock, step)) = self.advance.lock().unwrap().as_ref() {
            clock.advance(*step);
        }
        if let Some(reason) = &self.failure {
            return Err(MailTaskError::Transport(reason.clone()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, step: Duration) {
        *self.now.lock().unwrap() += step;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}
