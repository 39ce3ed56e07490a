use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{
    check_kinds, ConflictKey, EntityKind, Persistence, PersistenceError, Record, Result,
    Selector, Snapshot,
};
use crate::model::{
    AttendanceEvent, Class, ExamEvent, Expense, FinancialEvent, MonthKey, Notification,
    NotificationKind, Plan, Settings, Student,
};
use crate::money::Money;

pub const DB_FILE: &str = "halaqa.sqlite3";
const SETTINGS_KEY: &str = "app";
const NOTIFICATION_LIMIT: i64 = 50;

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if matches!(
                    f.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure
                ) =>
            {
                PersistenceError::Transport(e.to_string())
            }
            _ => PersistenceError::Rejected(e.to_string()),
        }
    }
}

fn decode_err(what: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Rejected(format!("failed to decode {}: {}", what, e))
}

/// Workspace database backed by a single SQLite file.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let conn = Connection::open(workspace.join(DB_FILE))?;
        init_schema(&conn)?;
        Ok(SqlitePersistence {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(SqlitePersistence {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::Transport("database connection poisoned".to_string()))
    }

    fn load_all_blocking(&self, kinds: &[EntityKind]) -> Result<Snapshot> {
        let conn = self.lock()?;
        let mut snapshot = Snapshot::new();
        for kind in kinds {
            let records = match kind {
                EntityKind::Student => load_students(&conn, None)?,
                EntityKind::Class => load_classes(&conn, None)?,
                EntityKind::Plan => load_plans(&conn, None)?,
                EntityKind::Attendance => load_attendance(&conn)?,
                EntityKind::Exam => load_exams(&conn, None)?,
                EntityKind::Financial => load_financials(&conn)?,
                EntityKind::Expense => load_expenses(&conn, None)?,
                EntityKind::Settings => load_settings(&conn)?,
                EntityKind::Notification => load_notifications(&conn, None)?,
            };
            snapshot.insert(*kind, records);
        }
        Ok(snapshot)
    }

    fn upsert_blocking(&self, kind: EntityKind, records: Vec<Record>) -> Result<()> {
        check_kinds(kind, &records)?;
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for record in &records {
            upsert_one(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_blocking(&self, kind: EntityKind, selector: Selector) -> Result<usize> {
        let conn = self.lock()?;
        let table = table_for(kind);
        let removed = match selector {
            Selector::All => conn.execute(&format!("DELETE FROM {}", table), [])?,
            Selector::Id(id) => {
                require_id_column(kind)?;
                conn.execute(&format!("DELETE FROM {} WHERE id = ?", table), [&id])?
            }
            Selector::Ids(ids) => {
                require_id_column(kind)?;
                let tx = conn.unchecked_transaction()?;
                let mut n = 0;
                for id in &ids {
                    n += tx.execute(&format!("DELETE FROM {} WHERE id = ?", table), [id])?;
                }
                tx.commit()?;
                n
            }
            Selector::Student(student_id) => {
                if !matches!(
                    kind,
                    EntityKind::Attendance | EntityKind::Exam | EntityKind::Financial
                ) {
                    return Err(PersistenceError::Rejected(format!(
                        "{} records are not keyed by student",
                        kind
                    )));
                }
                conn.execute(
                    &format!("DELETE FROM {} WHERE student_id = ?", table),
                    [&student_id],
                )?
            }
        };
        Ok(removed)
    }

    fn get_blocking(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let found = match kind.conflict_key() {
            ConflictKey::Singleton => load_settings(&conn)?.into_iter().next(),
            ConflictKey::Natural => {
                return Err(PersistenceError::Rejected(format!(
                    "{} records have no id",
                    kind
                )))
            }
            ConflictKey::Id => {
                let one = match kind {
                    EntityKind::Student => load_students(&conn, Some(id))?,
                    EntityKind::Class => load_classes(&conn, Some(id))?,
                    EntityKind::Plan => load_plans(&conn, Some(id))?,
                    EntityKind::Exam => load_exams(&conn, Some(id))?,
                    EntityKind::Expense => load_expenses(&conn, Some(id))?,
                    _ => load_notifications(&conn, Some(id))?,
                };
                one.into_iter().next()
            }
        };
        Ok(found)
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    #[tracing::instrument(name = "sqlite.load_all", skip_all, fields(kinds = kinds.len()))]
    async fn load_all(&self, kinds: &[EntityKind]) -> Result<Snapshot> {
        self.load_all_blocking(kinds)
    }

    #[tracing::instrument(name = "sqlite.upsert", skip_all, fields(kind = %kind, count = records.len()))]
    async fn upsert(&self, kind: EntityKind, records: Vec<Record>) -> Result<()> {
        self.upsert_blocking(kind, records)
    }

    #[tracing::instrument(name = "sqlite.delete", skip_all, fields(kind = %kind))]
    async fn delete(&self, kind: EntityKind, selector: Selector) -> Result<usize> {
        self.delete_blocking(kind, selector)
    }

    #[tracing::instrument(name = "sqlite.get", skip_all, fields(kind = %kind, id = id))]
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        self.get_blocking(kind, id)
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    // Referential integrity between students and classes/plans is kept by the
    // session, so no FOREIGN KEY clauses here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            age INTEGER,
            guardian_name TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            country_code TEXT NOT NULL DEFAULT '',
            enrolled_on TEXT,
            class_id TEXT,
            plan_id TEXT,
            start_unit INTEGER,
            notes TEXT NOT NULL DEFAULT '',
            progress TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_plan ON students(plan_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            schedule TEXT NOT NULL DEFAULT '',
            fee_minor INTEGER NOT NULL DEFAULT 0,
            photo TEXT,
            teacher_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plans(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            pages_per_week INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam_data TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_student ON exams(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS financials(
            student_id TEXT NOT NULL,
            month TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(student_id, month)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_financials_month ON financials(month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses(
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            date TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            message TEXT NOT NULL,
            kind TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_created ON notifications(created_at)",
        [],
    )?;

    Ok(())
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Student => "students",
        EntityKind::Class => "classes",
        EntityKind::Plan => "plans",
        EntityKind::Attendance => "attendance",
        EntityKind::Exam => "exams",
        EntityKind::Financial => "financials",
        EntityKind::Expense => "expenses",
        EntityKind::Settings => "settings",
        EntityKind::Notification => "notifications",
    }
}

fn require_id_column(kind: EntityKind) -> Result<()> {
    match kind.conflict_key() {
        ConflictKey::Id => Ok(()),
        _ => Err(PersistenceError::Rejected(format!(
            "{} records cannot be deleted by id",
            kind
        ))),
    }
}

fn upsert_one(conn: &Connection, record: &Record) -> Result<()> {
    match record {
        Record::Student(s) => {
            let progress = serde_json::to_string(&s.progress)
                .map_err(|e| PersistenceError::Rejected(e.to_string()))?;
            conn.execute(
                "INSERT INTO students(id, name, age, guardian_name, phone, country_code,
                                      enrolled_on, class_id, plan_id, start_unit, notes,
                                      progress, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   age = excluded.age,
                   guardian_name = excluded.guardian_name,
                   phone = excluded.phone,
                   country_code = excluded.country_code,
                   enrolled_on = excluded.enrolled_on,
                   class_id = excluded.class_id,
                   plan_id = excluded.plan_id,
                   start_unit = excluded.start_unit,
                   notes = excluded.notes,
                   progress = excluded.progress,
                   updated_at = excluded.updated_at",
                rusqlite::params![
                    s.id,
                    s.name,
                    s.age,
                    s.guardian_name,
                    s.phone,
                    s.country_code,
                    s.enrolled_on.map(|d| d.to_string()),
                    s.class_id,
                    s.plan_id,
                    s.start_unit,
                    s.notes,
                    progress,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        Record::Class(c) => {
            conn.execute(
                "INSERT INTO classes(id, name, schedule, fee_minor, photo, teacher_id)
                 VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   schedule = excluded.schedule,
                   fee_minor = excluded.fee_minor,
                   photo = excluded.photo,
                   teacher_id = excluded.teacher_id",
                rusqlite::params![c.id, c.name, c.schedule, c.fee.minor(), c.photo, c.teacher_id],
            )?;
        }
        Record::Plan(p) => {
            conn.execute(
                "INSERT INTO plans(id, name, description, pages_per_week)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   description = excluded.description,
                   pages_per_week = excluded.pages_per_week",
                rusqlite::params![p.id, p.name, p.description, p.pages_per_week],
            )?;
        }
        Record::Attendance(a) => {
            conn.execute(
                "INSERT INTO attendance(student_id, date, status)
                 VALUES(?, ?, ?)
                 ON CONFLICT(student_id, date) DO UPDATE SET
                   status = excluded.status",
                (&a.student_id, a.date.to_string(), a.status.as_str()),
            )?;
        }
        Record::Exam(e) => {
            let data =
                serde_json::to_string(e).map_err(|e| PersistenceError::Rejected(e.to_string()))?;
            conn.execute(
                "INSERT INTO exams(id, student_id, exam_data)
                 VALUES(?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   student_id = excluded.student_id,
                   exam_data = excluded.exam_data",
                (&e.id, &e.student_id, &data),
            )?;
        }
        Record::Financial(f) => {
            conn.execute(
                "INSERT INTO financials(student_id, month, status)
                 VALUES(?, ?, ?)
                 ON CONFLICT(student_id, month) DO UPDATE SET
                   status = excluded.status",
                (&f.student_id, f.month.to_string(), f.status.as_str()),
            )?;
        }
        Record::Expense(x) => {
            conn.execute(
                "INSERT INTO expenses(id, description, amount_minor, date)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   description = excluded.description,
                   amount_minor = excluded.amount_minor,
                   date = excluded.date",
                (&x.id, &x.description, x.amount.minor(), x.date.to_string()),
            )?;
        }
        Record::Settings(s) => {
            let json =
                serde_json::to_string(s).map_err(|e| PersistenceError::Rejected(e.to_string()))?;
            conn.execute(
                "INSERT INTO settings(key, value_json)
                 VALUES(?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                   value_json = excluded.value_json",
                (SETTINGS_KEY, &json),
            )?;
        }
        Record::Notification(n) => {
            let kind = match n.kind {
                NotificationKind::Info => "info",
                NotificationKind::Success => "success",
                NotificationKind::Warning => "warning",
            };
            conn.execute(
                "INSERT INTO notifications(id, message, kind, is_read, created_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   message = excluded.message,
                   kind = excluded.kind,
                   is_read = excluded.is_read,
                   created_at = excluded.created_at",
                (
                    &n.id,
                    &n.message,
                    kind,
                    n.is_read as i64,
                    n.created_at.to_rfc3339(),
                ),
            )?;
        }
    }
    Ok(())
}

fn parse_opt_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| decode_err("date", e)),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| decode_err("date", e))
}

struct StudentRow {
    id: String,
    name: String,
    age: Option<u32>,
    guardian_name: String,
    phone: String,
    country_code: String,
    enrolled_on: Option<String>,
    class_id: Option<String>,
    plan_id: Option<String>,
    start_unit: Option<u8>,
    notes: String,
    progress: String,
}

/// Every row, or just the one with id `only`.
fn load_students(conn: &Connection, only: Option<&str>) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, age, guardian_name, phone, country_code, enrolled_on,
                class_id, plan_id, start_unit, notes, progress
         FROM students
         WHERE ?1 IS NULL OR id = ?1
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([only], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                name: r.get(1)?,
                age: r.get(2)?,
                guardian_name: r.get(3)?,
                phone: r.get(4)?,
                country_code: r.get(5)?,
                enrolled_on: r.get(6)?,
                class_id: r.get(7)?,
                plan_id: r.get(8)?,
                start_unit: r.get(9)?,
                notes: r.get(10)?,
                progress: r.get(11)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| {
            let progress = {
                let _span = tracing::warn_span!("student", student_id = %row.id).entered();
                serde_json::from_str(&row.progress).map_err(|e| decode_err("progress", e))?
            };
            Ok(Record::Student(Student {
                id: row.id,
                name: row.name,
                age: row.age,
                guardian_name: row.guardian_name,
                phone: row.phone,
                country_code: row.country_code,
                enrolled_on: parse_opt_date(row.enrolled_on)?,
                class_id: row.class_id,
                plan_id: row.plan_id,
                start_unit: row.start_unit,
                notes: row.notes,
                progress,
            }))
        })
        .collect()
}

fn load_classes(conn: &Connection, only: Option<&str>) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, schedule, fee_minor, photo, teacher_id FROM classes
         WHERE ?1 IS NULL OR id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([only], |r| {
            Ok(Record::Class(Class {
                id: r.get(0)?,
                name: r.get(1)?,
                schedule: r.get(2)?,
                fee: Money::from_minor(r.get(3)?),
                photo: r.get(4)?,
                teacher_id: r.get(5)?,
            }))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_plans(conn: &Connection, only: Option<&str>) -> Result<Vec<Record>> {
    let mut stmt = conn
        .prepare(
        "SELECT id, name, description, pages_per_week FROM plans
         WHERE ?1 IS NULL OR id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([only], |r| {
            Ok(Record::Plan(Plan {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
                pages_per_week: r.get(3)?,
            }))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_attendance(conn: &Connection) -> Result<Vec<Record>> {
    let mut stmt =
        conn.prepare("SELECT student_id, date, status FROM attendance ORDER BY date, rowid")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(student_id, date, status)| {
            Ok(Record::Attendance(AttendanceEvent {
                date: parse_date(&date)?,
                student_id,
                status: status.parse().map_err(|e| decode_err("attendance status", e))?,
            }))
        })
        .collect()
}

fn load_exams(conn: &Connection, only: Option<&str>) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare("SELECT exam_data FROM exams WHERE ?1 IS NULL OR id = ?1 ORDER BY rowid")?;
    let rows = stmt
        .query_map([only], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|data| {
            let exam: ExamEvent = serde_json::from_str(&data).map_err(|e| decode_err("exam", e))?;
            Ok(Record::Exam(exam))
        })
        .collect()
}

fn load_financials(conn: &Connection) -> Result<Vec<Record>> {
    let mut stmt =
        conn.prepare("SELECT student_id, month, status FROM financials ORDER BY month, rowid")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(student_id, month, status)| {
            Ok(Record::Financial(FinancialEvent {
                month: month
                    .parse::<MonthKey>()
                    .map_err(|e| decode_err("month", e))?,
                student_id,
                status: status.parse().map_err(|e| decode_err("payment status", e))?,
            }))
        })
        .collect()
}

fn load_expenses(conn: &Connection, only: Option<&str>) -> Result<Vec<Record>> {
    let mut stmt =
        conn.prepare(
        "SELECT id, description, amount_minor, date FROM expenses
         WHERE ?1 IS NULL OR id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([only], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, description, amount, date)| {
            Ok(Record::Expense(Expense {
                id,
                description,
                amount: Money::from_minor(amount),
                date: parse_date(&date)?,
            }))
        })
        .collect()
}

fn load_settings(conn: &Connection) -> Result<Vec<Record>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [SETTINGS_KEY],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(Vec::new()),
        Some(json) => {
            let settings: Settings =
                serde_json::from_str(&json).map_err(|e| decode_err("settings", e))?;
            Ok(vec![Record::Settings(settings)])
        }
    }
}

fn load_notifications(conn: &Connection, only: Option<&str>) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(
        "SELECT id, message, kind, is_read, created_at
         FROM notifications
         WHERE ?1 IS NULL OR id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![only, NOTIFICATION_LIMIT], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, message, kind, is_read, created_at)| {
            let kind = match kind.as_str() {
                "success" => NotificationKind::Success,
                "warning" => NotificationKind::Warning,
                _ => NotificationKind::Info,
            };
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| decode_err("notification timestamp", e))?
                .with_timezone(&Utc);
            Ok(Record::Notification(Notification {
                id,
                message,
                kind,
                is_read: is_read != 0,
                created_at,
            }))
        })
        .collect()
}
