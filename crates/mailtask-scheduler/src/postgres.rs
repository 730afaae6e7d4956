//! PostgreSQL-backed task store.
//!
//! Report procedures are real stored procedures with one `INOUT html_body`
//! parameter, called with named arguments.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mailtask_core::config::is_safe_identifier;
use mailtask_core::error::{MailTaskError, Result};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row};

use crate::store::{MailStore, StoreSession, Tables};
use crate::tasks::{
    DEFAULT_IMAGE_KIND, DeliveryKind, DomainValue, EmbeddedImage, MailTask, Recurrence,
    RecipientBinding, ReportDomain, RunLogEntry, Schedule,
};

/// Pooled PostgreSQL store.
pub struct PgStore {
    pool: PgPool,
    tables: Tables,
}

impl PgStore {
    pub async fn connect(url: &str, table_prefix: &str) -> Result<Self> {
        let tables = Tables::new(table_prefix)?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await
            .map_err(|e| db_err("PostgreSQL connect", e))?;
        tracing::info!("🐘 PostgreSQL store connected (prefix: '{table_prefix}')");
        Ok(Self { pool, tables })
    }
}

#[async_trait]
impl MailStore for PgStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn session(&self) -> Result<Box<dyn StoreSession>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_err("Acquire connection", e))?;
        Ok(Box::new(PgSession {
            conn,
            tables: self.tables.clone(),
        }))
    }
}

pub struct PgSession {
    conn: PoolConnection<Postgres>,
    tables: Tables,
}

#[derive(FromRow)]
struct TaskRow {
    id: i64,
    template_id: i64,
    name: String,
    report_procedure: String,
    schedule_type: String,
    schedule_date: Option<NaiveDate>,
    schedule_time: Option<NaiveTime>,
    weekday: Option<i32>,
    every_minutes: Option<i32>,
    active: bool,
    last_sent: Option<NaiveDateTime>,
    next_send: Option<NaiveDateTime>,
}

impl From<TaskRow> for MailTask {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            template_id: row.template_id,
            name: row.name,
            report_procedure: row.report_procedure,
            schedule: Schedule {
                kind: Recurrence::from_code(&row.schedule_type),
                date: row.schedule_date,
                time: row.schedule_time,
                weekday: row.weekday,
                every_minutes: row.every_minutes,
            },
            active: row.active,
            last_sent: row.last_sent,
            next_send: row.next_send,
        }
    }
}

#[async_trait]
impl StoreSession for PgSession {
    async fn due_tasks(&mut self, now: NaiveDateTime) -> Result<Vec<MailTask>> {
        let sql = format!(
            "SELECT id::int8 AS id, template_id::int8 AS template_id, name, report_procedure,
                    schedule_type, schedule_date, schedule_time,
                    weekday::int4 AS weekday, every_minutes::int4 AS every_minutes,
                    active, last_sent, next_send
             FROM {}
             WHERE active AND (next_send IS NULL OR next_send <= $1)
             ORDER BY id",
            self.tables.tasks
        );
        let rows: Vec<PgRow> = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| db_err("Due tasks", e))?;
        Ok(decode_tasks(&rows))
    }

    async fn recipients(&mut self, task_id: i64) -> Result<Vec<RecipientBinding>> {
        let t = &self.tables;
        let sql = format!(
            "SELECT r.email, k.name
             FROM {tr} m
             INNER JOIN {r} r ON r.id = m.recipient_id
             INNER JOIN {k} k ON k.id = m.delivery_kind_id
             WHERE m.mail_task_id = $1",
            tr = t.task_recipients,
            r = t.recipients,
            k = t.delivery_kinds
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(task_id)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| db_err("Recipients", e))?;
        Ok(rows
            .into_iter()
            .map(|(email, kind)| RecipientBinding {
                email,
                kind: DeliveryKind::from_code(&kind),
            })
            .collect())
    }

    async fn embedded_images(&mut self, template_id: i64) -> Result<Vec<EmbeddedImage>> {
        let sql = format!(
            "SELECT content_id, file_path, COALESCE(image_kind, '{DEFAULT_IMAGE_KIND}')
             FROM {} WHERE template_id = $1 ORDER BY id",
            self.tables.images
        );
        let rows: Vec<(String, String, String)> = sqlx::query_as(&sql)
            .bind(template_id)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| db_err("Images", e))?;
        Ok(rows
            .into_iter()
            .map(|(content_id, file_path, image_kind)| EmbeddedImage {
                content_id,
                file_path,
                image_kind,
            })
            .collect())
    }

    async fn domain_values(&mut self, task_id: i64) -> Result<Vec<DomainValue>> {
        let sql = format!(
            "SELECT domain, value FROM {} WHERE mail_task_id = $1 AND active ORDER BY id",
            self.tables.domain_values
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(task_id)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| db_err("Domain values", e))?;
        Ok(rows
            .into_iter()
            .map(|(domain, value)| DomainValue { domain, value })
            .collect())
    }

    async fn stylesheet_name(&mut self, template_id: i64) -> Result<Option<String>> {
        let sql = format!("SELECT stylesheet FROM {} WHERE id = $1", self.tables.templates);
        let name: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(template_id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| db_err("Stylesheet", e))?;
        Ok(name.flatten().filter(|n| !n.trim().is_empty()))
    }

    async fn call_report(
        &mut self,
        procedure: &str,
        domain: ReportDomain,
        value: &str,
        as_of: NaiveDate,
    ) -> Result<Option<String>> {
        let sql = report_call_sql(procedure, domain)?;
        let row = sqlx::query(&sql)
            .bind(value)
            .bind(as_of)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| db_err(&format!("Report '{procedure}'"), e))?;
        match row {
            Some(row) => row
                .try_get::<Option<String>, _>(0)
                .map_err(|e| db_err(&format!("Report '{procedure}' output"), e)),
            None => Ok(None),
        }
    }

    async fn complete_run(
        &mut self,
        task_id: i64,
        entries: &[RunLogEntry],
        sent_at: NaiveDateTime,
        next_send: NaiveDateTime,
    ) -> Result<()> {
        let insert = format!(
            "INSERT INTO {} (mail_task_id, success, message, sent_at) VALUES ($1, $2, $3, $4)",
            self.tables.log
        );
        let update = format!(
            "UPDATE {} SET last_sent = $1, next_send = $2 WHERE id = $3",
            self.tables.tasks
        );

        let mut tx = sqlx::Connection::begin(&mut *self.conn)
            .await
            .map_err(|e| db_err("Begin", e))?;

        for entry in entries {
            sqlx::query(&insert)
                .bind(entry.task_id)
                .bind(entry.success)
                .bind(&entry.message)
                .bind(entry.logged_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err("Insert log", e))?;
        }

        let updated = sqlx::query(&update)
            .bind(sent_at)
            .bind(next_send)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("Update task", e))?
            .rows_affected();
        if updated == 0 {
            return Err(MailTaskError::Store(format!("Task {task_id} no longer exists")));
        }

        tx.commit().await.map_err(|e| db_err("Commit", e))?;
        tracing::debug!("💾 Task {task_id}: {} log row(s), next send {next_send}", entries.len());
        Ok(())
    }
}

/// Decode task rows one by one; a row that does not decode is logged and
/// skipped so it cannot hold back the other tasks.
fn decode_tasks(rows: &[PgRow]) -> Vec<MailTask> {
    rows.iter()
        .filter_map(|row| match TaskRow::from_row(row) {
            Ok(task) => Some(MailTask::from(task)),
            Err(e) => {
                let id = row.try_get::<i64, _>("id").ok();
                tracing::error!("❌ Skipping task {id:?}: {e}");
                None
            }
        })
        .collect()
}

/// `CALL` statement for a report procedure: the domain parameter and
/// `fecha` are bound, `html_body` comes back as the single output column.
fn report_call_sql(procedure: &str, domain: ReportDomain) -> Result<String> {
    if !is_safe_identifier(procedure) {
        return Err(MailTaskError::Store(format!(
            "Invalid report procedure name '{procedure}'"
        )));
    }
    Ok(format!(
        "CALL {procedure}({} => $1, fecha => $2, html_body => NULL)",
        domain.parameter()
    ))
}

fn db_err(context: &str, e: sqlx::Error) -> MailTaskError {
    MailTaskError::Store(format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_call_sql() {
        assert_eq!(
            report_call_sql("reports.sp_daily", ReportDomain::Site).unwrap(),
            "CALL reports.sp_daily(faena => $1, fecha => $2, html_body => NULL)"
        );
        assert_eq!(
            report_call_sql("sp_shift", ReportDomain::Shift).unwrap(),
            "CALL sp_shift(turno => $1, fecha => $2, html_body => NULL)"
        );
    }

    #[test]
    fn test_report_call_rejects_unsafe_name() {
        let err = report_call_sql("sp(); DROP TABLE x", ReportDomain::Contract).unwrap_err();
        assert!(matches!(err, MailTaskError::Store(_)));
    }

    #[test]
    fn test_task_row_conversion() {
        let row = TaskRow {
            id: 7,
            template_id: 3,
            name: "weekly".into(),
            report_procedure: "sp_weekly".into(),
            schedule_type: "SEMANAL".into(),
            schedule_date: None,
            schedule_time: NaiveTime::from_hms_opt(7, 30, 0),
            weekday: Some(5),
            every_minutes: None,
            active: true,
            last_sent: None,
            next_send: None,
        };
        let task = MailTask::from(row);
        assert_eq!(task.schedule.kind, Recurrence::Weekly);
        assert_eq!(task.schedule.weekday, Some(5));
    }
}
