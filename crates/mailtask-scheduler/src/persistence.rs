//! SQLite-backed task store.
//!
//! SQLite has no stored procedures, so report procedures are rows in the
//! `report_procedures` table: a named SQL query using `:contrato`,
//! `:gerencia`, `:faena`, `:turno` and `:fecha` parameters whose first column
//! is the rendered HTML.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mailtask_core::error::{MailTaskError, Result};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension};

use crate::store::{MailStore, StoreSession, Tables};
use crate::tasks::{
    DEFAULT_IMAGE_KIND, DeliveryKind, DomainValue, EmbeddedImage, MailTask, Recurrence,
    RecipientBinding, ReportDomain, RunLogEntry, Schedule,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// SQLite-backed persistence for mail tasks.
pub struct SqliteStore {
    path: PathBuf,
    tables: Tables,
}

impl SqliteStore {
    /// Open or create the database and run migrations.
    pub fn open(path: &Path, table_prefix: &str) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            path: path.to_path_buf(),
            tables: Tables::new(table_prefix)?,
        };
        let conn = store.connect()?;
        store.migrate(&conn)?;
        tracing::info!("🗄️ SQLite store ready at {}", path.display());
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(|e| db_err("DB open", e))
    }

    /// Run migrations to create tables.
    fn migrate(&self, conn: &Connection) -> Result<()> {
        let t = &self.tables;
        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {tasks} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                report_procedure TEXT NOT NULL,
                schedule_type TEXT NOT NULL,     -- UNICO, CADA_X_MINUTOS, DIARIO, SEMANAL, MENSUAL
                schedule_date TEXT,              -- YYYY-MM-DD (MENSUAL day-of-month)
                schedule_time TEXT,              -- HH:MM:SS
                weekday INTEGER,                 -- 0 = Sunday
                every_minutes INTEGER,
                active INTEGER NOT NULL DEFAULT 1,
                last_sent TEXT,
                next_send TEXT
            );

            CREATE TABLE IF NOT EXISTS {recipients} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS {kinds} (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );
            INSERT OR IGNORE INTO {kinds} (id, name) VALUES (1, 'TO'), (2, 'CC'), (3, 'BCC');

            CREATE TABLE IF NOT EXISTS {task_recipients} (
                mail_task_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                delivery_kind_id INTEGER NOT NULL,
                PRIMARY KEY (mail_task_id, recipient_id)
            );

            CREATE TABLE IF NOT EXISTS {templates} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                stylesheet TEXT
            );

            CREATE TABLE IF NOT EXISTS {images} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id INTEGER NOT NULL,
                content_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                image_kind TEXT
            );

            CREATE TABLE IF NOT EXISTS {domain_values} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mail_task_id INTEGER NOT NULL,
                domain TEXT NOT NULL,
                value TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            -- Append-only
            CREATE TABLE IF NOT EXISTS {log} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mail_task_id INTEGER NOT NULL,
                success INTEGER NOT NULL,
                message TEXT NOT NULL,
                sent_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {procedures} (
                name TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            ",
            tasks = t.tasks,
            recipients = t.recipients,
            kinds = t.delivery_kinds,
            task_recipients = t.task_recipients,
            templates = t.templates,
            images = t.images,
            domain_values = t.domain_values,
            log = t.log,
            procedures = t.report_procedures,
        ))
        .map_err(|e| db_err("Migration", e))
    }

    // ─── Administration (task definitions are edited outside the daemon) ──

    /// Insert a template; returns its id.
    pub fn add_template(&self, name: &str, stylesheet: Option<&str>) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            &format!("INSERT INTO {} (name, stylesheet) VALUES (?1, ?2)", self.tables.templates),
            rusqlite::params![name, stylesheet],
        )
        .map_err(|e| db_err("Add template", e))?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a task (its `id` is ignored); returns the new id.
    pub fn add_task(&self, task: &MailTask) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (template_id, name, report_procedure, schedule_type, schedule_date,
                     schedule_time, weekday, every_minutes, active, last_sent, next_send)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                self.tables.tasks
            ),
            rusqlite::params![
                task.template_id,
                task.name,
                task.report_procedure,
                task.schedule.kind.code(),
                task.schedule.date.map(|d| d.format(DATE_FORMAT).to_string()),
                task.schedule.time.map(|t| t.format(TIME_FORMAT).to_string()),
                task.schedule.weekday,
                task.schedule.every_minutes,
                task.active as i32,
                task.last_sent.map(fmt_ts),
                task.next_send.map(fmt_ts),
            ],
        )
        .map_err(|e| db_err("Add task", e))?;
        Ok(conn.last_insert_rowid())
    }

    /// Bind an address to a task with a delivery kind name (`TO`, `CC`, `BCC`, ...).
    pub fn add_recipient(&self, task_id: i64, email: &str, kind: &str) -> Result<()> {
        let conn = self.connect()?;
        let t = &self.tables;
        conn.execute(
            &format!("INSERT OR IGNORE INTO {} (email) VALUES (?1)", t.recipients),
            [email],
        )
        .map_err(|e| db_err("Add recipient", e))?;
        conn.execute(
            &format!("INSERT OR IGNORE INTO {} (name) VALUES (?1)", t.delivery_kinds),
            [kind],
        )
        .map_err(|e| db_err("Add delivery kind", e))?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {tr} (mail_task_id, recipient_id, delivery_kind_id)
                 SELECT ?1, r.id, k.id FROM {r} r, {k} k WHERE r.email = ?2 AND k.name = ?3",
                tr = t.task_recipients,
                r = t.recipients,
                k = t.delivery_kinds
            ),
            rusqlite::params![task_id, email, kind],
        )
        .map_err(|e| db_err("Bind recipient", e))?;
        Ok(())
    }

    pub fn add_image(
        &self,
        template_id: i64,
        content_id: &str,
        file_path: &str,
        image_kind: Option<&str>,
    ) -> Result<()> {
        self.connect()?
            .execute(
                &format!(
                    "INSERT INTO {} (template_id, content_id, file_path, image_kind) VALUES (?1, ?2, ?3, ?4)",
                    self.tables.images
                ),
                rusqlite::params![template_id, content_id, file_path, image_kind],
            )
            .map_err(|e| db_err("Add image", e))?;
        Ok(())
    }

    pub fn add_domain_value(&self, task_id: i64, domain: &str, value: &str, active: bool) -> Result<()> {
        self.connect()?
            .execute(
                &format!(
                    "INSERT INTO {} (mail_task_id, domain, value, active) VALUES (?1, ?2, ?3, ?4)",
                    self.tables.domain_values
                ),
                rusqlite::params![task_id, domain, value, active as i32],
            )
            .map_err(|e| db_err("Add domain value", e))?;
        Ok(())
    }

    /// Create or replace a report procedure body.
    pub fn set_report_procedure(&self, name: &str, body: &str) -> Result<()> {
        self.connect()?
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (name, body) VALUES (?1, ?2)",
                    self.tables.report_procedures
                ),
                [name, body],
            )
            .map_err(|e| db_err("Save procedure", e))?;
        Ok(())
    }

    /// Load one task by id, whatever its state.
    pub fn load_task(&self, id: i64) -> Result<Option<MailTask>> {
        let conn = self.connect()?;
        let sql = format!("{} WHERE id = ?1", select_tasks(&self.tables));
        let raw = conn
            .query_row(&sql, [id], RawTask::from_row)
            .optional()
            .map_err(|e| db_err("Load task", e))?;
        raw.map(RawTask::into_task).transpose()
    }

    /// Run-log rows of a task, oldest first.
    pub fn run_log(&self, task_id: i64) -> Result<Vec<RunLogEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT mail_task_id, success, message, sent_at FROM {} WHERE mail_task_id = ?1 ORDER BY id",
                self.tables.log
            ))
            .map_err(|e| db_err("Run log", e))?;
        let rows = stmt
            .query_map([task_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i32>(1)? != 0,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| db_err("Run log", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("Run log", e))?;

        rows.into_iter()
            .map(|(task_id, success, message, sent_at)| {
                Ok(RunLogEntry {
                    task_id,
                    success,
                    message,
                    logged_at: parse_ts(&sent_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MailStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(SqliteSession {
            conn: self.connect()?,
            tables: self.tables.clone(),
        }))
    }
}

/// One SQLite connection for a scheduling cycle.
pub struct SqliteSession {
    conn: Connection,
    tables: Tables,
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn due_tasks(&mut self, now: NaiveDateTime) -> Result<Vec<MailTask>> {
        let sql = format!(
            "{} WHERE active = 1 AND (next_send IS NULL OR next_send <= ?1) ORDER BY id",
            select_tasks(&self.tables)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(|e| db_err("Due tasks", e))?;
        let rows = stmt
            .query_map([fmt_ts(now)], RawTask::from_row)
            .map_err(|e| db_err("Due tasks", e))?;

        // A malformed row is skipped so it cannot hold back the other tasks.
        let mut tasks = Vec::new();
        for row in rows {
            let raw = match row {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!("❌ Skipping unreadable task row: {e}");
                    continue;
                }
            };
            let id = raw.id;
            match raw.into_task() {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::error!("❌ Skipping task {id}: {e}"),
            }
        }
        Ok(tasks)
    }

    async fn recipients(&mut self, task_id: i64) -> Result<Vec<RecipientBinding>> {
        let t = &self.tables;
        let sql = format!(
            "SELECT r.email, k.name
             FROM {tr} m
             INNER JOIN {r} r ON r.id = m.recipient_id
             INNER JOIN {k} k ON k.id = m.delivery_kind_id
             WHERE m.mail_task_id = ?1",
            tr = t.task_recipients,
            r = t.recipients,
            k = t.delivery_kinds
        );
        let mut stmt = self.conn.prepare(&sql).map_err(|e| db_err("Recipients", e))?;
        stmt.query_map([task_id], |row| {
            let kind: String = row.get(1)?;
            Ok(RecipientBinding {
                email: row.get(0)?,
                kind: DeliveryKind::from_code(&kind),
            })
        })
        .map_err(|e| db_err("Recipients", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| db_err("Recipients", e))
    }

    async fn embedded_images(&mut self, template_id: i64) -> Result<Vec<EmbeddedImage>> {
        let sql = format!(
            "SELECT content_id, file_path, COALESCE(image_kind, '{DEFAULT_IMAGE_KIND}')
             FROM {} WHERE template_id = ?1 ORDER BY id",
            self.tables.images
        );
        let mut stmt = self.conn.prepare(&sql).map_err(|e| db_err("Images", e))?;
        stmt.query_map([template_id], |row| {
            Ok(EmbeddedImage {
                content_id: row.get(0)?,
                file_path: row.get(1)?,
                image_kind: row.get(2)?,
            })
        })
        .map_err(|e| db_err("Images", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| db_err("Images", e))
    }

    async fn domain_values(&mut self, task_id: i64) -> Result<Vec<DomainValue>> {
        let sql = format!(
            "SELECT domain, value FROM {} WHERE mail_task_id = ?1 AND active = 1 ORDER BY id",
            self.tables.domain_values
        );
        let mut stmt = self.conn.prepare(&sql).map_err(|e| db_err("Domain values", e))?;
        stmt.query_map([task_id], |row| {
            Ok(DomainValue {
                domain: row.get(0)?,
                value: row.get(1)?,
            })
        })
        .map_err(|e| db_err("Domain values", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| db_err("Domain values", e))
    }

    async fn stylesheet_name(&mut self, template_id: i64) -> Result<Option<String>> {
        let name: Option<Option<String>> = self
            .conn
            .query_row(
                &format!("SELECT stylesheet FROM {} WHERE id = ?1", self.tables.templates),
                [template_id],
                |row| row.get(0),
            )
            .optional()
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
        let body: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT body FROM {} WHERE name = ?1", self.tables.report_procedures),
                [procedure],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("Report lookup", e))?;
        let body = body.ok_or_else(|| {
            MailTaskError::Store(format!("Unknown report procedure '{procedure}'"))
        })?;

        let mut stmt = self
            .conn
            .prepare(&body)
            .map_err(|e| db_err(&format!("Report '{procedure}'"), e))?;

        let value_param = format!(":{}", domain.parameter());
        let fecha = as_of.format(DATE_FORMAT).to_string();
        let mut params: Vec<(&str, &dyn ToSql)> = Vec::with_capacity(2);
        if has_param(&stmt, &value_param)? {
            params.push((value_param.as_str(), &value as &dyn ToSql));
        }
        if has_param(&stmt, ":fecha")? {
            params.push((":fecha", &fecha as &dyn ToSql));
        }

        let html: Option<Option<String>> = stmt
            .query_row(params.as_slice(), |row| row.get(0))
            .optional()
            .map_err(|e| db_err(&format!("Report '{procedure}'"), e))?;
        Ok(html.flatten())
    }

    async fn complete_run(
        &mut self,
        task_id: i64,
        entries: &[RunLogEntry],
        sent_at: NaiveDateTime,
        next_send: NaiveDateTime,
    ) -> Result<()> {
        let t = self.tables.clone();
        let tx = self
            .conn
            .transaction()
            .map_err(|e| db_err("Begin", e))?;

        for entry in entries {
            tx.execute(
                &format!(
                    "INSERT INTO {} (mail_task_id, success, message, sent_at) VALUES (?1, ?2, ?3, ?4)",
                    t.log
                ),
                rusqlite::params![
                    entry.task_id,
                    entry.success as i32,
                    entry.message,
                    fmt_ts(entry.logged_at)
                ],
            )
            .map_err(|e| db_err("Insert log", e))?;
        }

        let updated = tx
            .execute(
                &format!("UPDATE {} SET last_sent = ?1, next_send = ?2 WHERE id = ?3", t.tasks),
                rusqlite::params![fmt_ts(sent_at), fmt_ts(next_send), task_id],
            )
            .map_err(|e| db_err("Update task", e))?;
        if updated == 0 {
            return Err(MailTaskError::Store(format!("Task {task_id} no longer exists")));
        }

        tx.commit().map_err(|e| db_err("Commit", e))?;
        tracing::debug!("💾 Task {task_id}: {} log row(s), next send {next_send}", entries.len());
        Ok(())
    }
}

fn select_tasks(t: &Tables) -> String {
    format!(
        "SELECT id, template_id, name, report_procedure, schedule_type, schedule_date, schedule_time,
                weekday, every_minutes, active, last_sent, next_send
         FROM {}",
        t.tasks
    )
}

/// Task row as stored; dates and times are still text.
struct RawTask {
    id: i64,
    template_id: i64,
    name: String,
    report_procedure: String,
    schedule_type: String,
    schedule_date: Option<String>,
    schedule_time: Option<String>,
    weekday: Option<i32>,
    every_minutes: Option<i32>,
    active: bool,
    last_sent: Option<String>,
    next_send: Option<String>,
}

impl RawTask {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            template_id: row.get(1)?,
            name: row.get(2)?,
            report_procedure: row.get(3)?,
            schedule_type: row.get(4)?,
            schedule_date: row.get(5)?,
            schedule_time: row.get(6)?,
            weekday: row.get(7)?,
            every_minutes: row.get(8)?,
            active: row.get::<_, i32>(9)? != 0,
            last_sent: row.get(10)?,
            next_send: row.get(11)?,
        })
    }

    fn into_task(self) -> Result<MailTask> {
        let schedule_date = self
            .schedule_date
            .map(|d| {
                NaiveDate::parse_from_str(&d, DATE_FORMAT)
                    .map_err(|e| MailTaskError::Store(format!("Task {}: bad schedule_date '{d}': {e}", self.id)))
            })
            .transpose()?;
        let schedule_time = self.schedule_time.map(|t| parse_time(&t)).transpose()?;

        Ok(MailTask {
            id: self.id,
            template_id: self.template_id,
            name: self.name,
            report_procedure: self.report_procedure,
            schedule: Schedule {
                kind: Recurrence::from_code(&self.schedule_type),
                date: schedule_date,
                time: schedule_time,
                weekday: self.weekday,
                every_minutes: self.every_minutes,
            },
            active: self.active,
            last_sent: self.last_sent.as_deref().map(parse_ts).transpose()?,
            next_send: self.next_send.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn has_param(stmt: &rusqlite::Statement<'_>, name: &str) -> Result<bool> {
    stmt.parameter_index(name)
        .map(|idx| idx.is_some())
        .map_err(|e| db_err("Report parameters", e))
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map_err(|e| MailTaskError::Store(format!("Bad timestamp '{s}': {e}")))
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| MailTaskError::Store(format!("Bad time '{s}': {e}")))
}

fn db_err(context: &str, e: rusqlite::Error) -> MailTaskError {
    MailTaskError::Store(format!("{context}: {e}"))
}
