//! Persistence collaborator.
//!
//! The core only ever talks to storage through [`Persistence`]: bulk load,
//! upsert-on-conflict, delete by selector and point reads. Backends decide
//! how records are laid out.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::model::{
    AttendanceEvent, Class, ExamEvent, Expense, FinancialEvent, Notification, Plan, Settings,
    Student,
};

#[cfg(test)]
pub mod memory;
pub mod sqlite;

pub use sqlite::SqlitePersistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Student,
    Class,
    Plan,
    Attendance,
    Exam,
    Financial,
    Expense,
    Settings,
    Notification,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Student,
        EntityKind::Class,
        EntityKind::Plan,
        EntityKind::Attendance,
        EntityKind::Exam,
        EntityKind::Financial,
        EntityKind::Expense,
        EntityKind::Settings,
        EntityKind::Notification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Student => "student",
            EntityKind::Class => "class",
            EntityKind::Plan => "plan",
            EntityKind::Attendance => "attendance",
            EntityKind::Exam => "exam",
            EntityKind::Financial => "financial",
            EntityKind::Expense => "expense",
            EntityKind::Settings => "settings",
            EntityKind::Notification => "notification",
        }
    }

    /// What an upsert of this kind collides on.
    pub fn conflict_key(self) -> ConflictKey {
        match self {
            EntityKind::Attendance | EntityKind::Financial => ConflictKey::Natural,
            EntityKind::Settings => ConflictKey::Singleton,
            _ => ConflictKey::Id,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKey {
    Id,
    /// `(student, date)` for attendance, `(student, month)` for payments.
    Natural,
    Singleton,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Student(Student),
    Class(Class),
    Plan(Plan),
    Attendance(AttendanceEvent),
    Exam(ExamEvent),
    Financial(FinancialEvent),
    Expense(Expense),
    Settings(Settings),
    Notification(Notification),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Student(_) => EntityKind::Student,
            Record::Class(_) => EntityKind::Class,
            Record::Plan(_) => EntityKind::Plan,
            Record::Attendance(_) => EntityKind::Attendance,
            Record::Exam(_) => EntityKind::Exam,
            Record::Financial(_) => EntityKind::Financial,
            Record::Expense(_) => EntityKind::Expense,
            Record::Settings(_) => EntityKind::Settings,
            Record::Notification(_) => EntityKind::Notification,
        }
    }
}

/// Which rows a delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Ids(Vec<String>),
    Student(String),
    All,
}

pub type Snapshot = BTreeMap<EntityKind, Vec<Record>>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backend could not be reached or was busy; retrying may succeed.
    #[error("storage unavailable: {0}")]
    Transport(String),

    /// The backend refused the request; retrying the same call will fail again.
    #[error("storage rejected request: {0}")]
    Rejected(String),
}

impl PersistenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Bulk read of every record of the requested kinds.
    async fn load_all(&self, kinds: &[EntityKind]) -> Result<Snapshot>;

    /// Insert-or-update keyed on `kind.conflict_key()`. Every record must be of `kind`.
    async fn upsert(&self, kind: EntityKind, records: Vec<Record>) -> Result<()>;

    /// Returns the number of rows removed.
    async fn delete(&self, kind: EntityKind, selector: Selector) -> Result<usize>;

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>>;
}

pub(crate) fn check_kinds(kind: EntityKind, records: &[Record]) -> Result<()> {
    match records.iter().find(|r| r.kind() != kind) {
        Some(r) => Err(PersistenceError::Rejected(format!(
            "{} record passed to {} upsert",
            r.kind(),
            kind
        ))),
        None => Ok(()),
    }
}
