//! Mail task definitions: the data model for scheduled reports.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mailtask_core::error::MailTaskError;
use std::str::FromStr;

/// A scheduled report task, as returned by the due-task query.
#[derive(Debug, Clone)]
pub struct MailTask {
    pub id: i64,
    /// Template owning the stylesheet and the embedded images.
    pub template_id: i64,
    /// Display name.
    pub name: String,
    /// Report procedure invoked once per domain value.
    pub report_procedure: String,
    pub schedule: Schedule,
    pub active: bool,
    pub last_sent: Option<NaiveDateTime>,
    pub next_send: Option<NaiveDateTime>,
}

impl MailTask {
    /// Active and never scheduled, or scheduled at/before `now`.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.active && self.next_send.is_none_or(|next| next <= now)
    }
}

/// Recurrence type plus its parameters. Only the parameters relevant to
/// `kind` are read; the others are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub kind: Recurrence,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: Option<i32>,
    pub every_minutes: Option<i32>,
}

/// How a task recurs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Recurrence {
    /// `UNICO`: send once, then never again.
    Once,
    /// `CADA_X_MINUTOS`
    EveryMinutes,
    /// `DIARIO`
    Daily,
    /// `SEMANAL`
    Weekly,
    /// `MENSUAL`
    Monthly,
    /// Anything else stored in the schedule column.
    #[default]
    Unrecognized,
}

impl Recurrence {
    /// Parse the stored schedule type. Matching is exact.
    pub fn from_code(code: &str) -> Self {
        match code {
            "UNICO" => Self::Once,
            "CADA_X_MINUTOS" => Self::EveryMinutes,
            "DIARIO" => Self::Daily,
            "SEMANAL" => Self::Weekly,
            "MENSUAL" => Self::Monthly,
            _ => Self::Unrecognized,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Once => "UNICO",
            Self::EveryMinutes => "CADA_X_MINUTOS",
            Self::Daily => "DIARIO",
            Self::Weekly => "SEMANAL",
            Self::Monthly => "MENSUAL",
            Self::Unrecognized => "?",
        }
    }
}

/// How a recipient is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    To,
    Cc,
    Bcc,
}

impl DeliveryKind {
    /// `TO` and `CC` match exactly; every other value is blind copy.
    pub fn from_code(code: &str) -> Self {
        match code {
            "TO" => Self::To,
            "CC" => Self::Cc,
            _ => Self::Bcc,
        }
    }
}

/// A task's association to one email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientBinding {
    pub email: String,
    pub kind: DeliveryKind,
}

/// Default image kind when the store has none.
pub const DEFAULT_IMAGE_KIND: &str = "NORMAL";

/// An image attached inline to every message of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub content_id: String,
    pub file_path: String,
    pub image_kind: String,
}

/// One parameter binding a task's report is repeated over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainValue {
    pub domain: String,
    pub value: String,
}

impl DomainValue {
    pub fn new(domain: &str, value: &str) -> Self {
        Self {
            domain: domain.to_string(),
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for DomainValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.domain, self.value)
    }
}

/// Domains the report procedures understand, each bound to one named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportDomain {
    Contract,
    Management,
    Site,
    Shift,
}

impl ReportDomain {
    /// Name of the procedure parameter receiving the domain value.
    pub fn parameter(&self) -> &'static str {
        match self {
            Self::Contract => "contrato",
            Self::Management => "gerencia",
            Self::Site => "faena",
            Self::Shift => "turno",
        }
    }
}

impl FromStr for ReportDomain {
    type Err = MailTaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CONTRATO" => Ok(Self::Contract),
            "GERENCIA" => Ok(Self::Management),
            "FAENA" => Ok(Self::Site),
            "TURNO" => Ok(Self::Shift),
            _ => Err(MailTaskError::UnsupportedDomain(s.to_string())),
        }
    }
}

/// One append-only run-log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogEntry {
    pub task_id: i64,
    pub success: bool,
    pub message: String,
    pub logged_at: NaiveDateTime,
}

impl RunLogEntry {
    pub fn success(task_id: i64, message: &str, logged_at: NaiveDateTime) -> Self {
        Self {
            task_id,
            success: true,
            message: message.to_string(),
            logged_at,
        }
    }

    pub fn failure(task_id: i64, message: String, logged_at: NaiveDateTime) -> Self {
        Self {
            task_id,
            success: false,
            message,
            logged_at,
        }
    }
}
