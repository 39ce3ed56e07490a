//! In-memory persistence for tests, with write-failure injection.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    check_kinds, ConflictKey, EntityKind, Persistence, PersistenceError, Record, Result,
    Selector, Snapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transport,
    Rejected,
}

#[derive(Default)]
pub struct MemoryPersistence {
    tables: RwLock<Snapshot>,
    fail_writes_after: RwLock<Option<(usize, Failure)>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails from now on.
    pub async fn fail_writes(&self, failure: Failure) {
        self.fail_writes_after_n(0, failure).await;
    }

    /// Lets `n` more writes through, then fails the rest.
    pub async fn fail_writes_after_n(&self, n: usize, failure: Failure) {
        *self.fail_writes_after.write().await = Some((n, failure));
    }

    pub async fn heal(&self) {
        *self.fail_writes_after.write().await = None;
    }

    pub async fn records(&self, kind: EntityKind) -> Vec<Record> {
        self.tables
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn seed(&self, records: Vec<Record>) {
        let mut tables = self.tables.write().await;
        for r in records {
            upsert_into(tables.entry(r.kind()).or_default(), r);
        }
    }

    async fn check_write(&self) -> Result<()> {
        let mut gate = self.fail_writes_after.write().await;
        if let Some((remaining, failure)) = gate.as_mut() {
            if *remaining == 0 {
                return Err(match failure {
                    Failure::Transport => PersistenceError::Transport("injected".to_string()),
                    Failure::Rejected => PersistenceError::Rejected("injected".to_string()),
                });
            }
            *remaining -= 1;
        }
        Ok(())
    }
}

fn same_key(a: &Record, b: &Record) -> bool {
    match (a, b) {
        (Record::Student(x), Record::Student(y)) => x.id == y.id,
        (Record::Class(x), Record::Class(y)) => x.id == y.id,
        (Record::Plan(x), Record::Plan(y)) => x.id == y.id,
        (Record::Exam(x), Record::Exam(y)) => x.id == y.id,
        (Record::Expense(x), Record::Expense(y)) => x.id == y.id,
        (Record::Notification(x), Record::Notification(y)) => x.id == y.id,
        (Record::Attendance(x), Record::Attendance(y)) => {
            x.student_id == y.student_id && x.date == y.date
        }
        (Record::Financial(x), Record::Financial(y)) => {
            x.student_id == y.student_id && x.month == y.month
        }
        (Record::Settings(_), Record::Settings(_)) => true,
        _ => false,
    }
}

fn upsert_into(rows: &mut Vec<Record>, record: Record) {
    match rows.iter_mut().find(|r| same_key(r, &record)) {
        Some(slot) => *slot = record,
        None => rows.push(record),
    }
}

fn id_of(r: &Record) -> Option<&str> {
    match r {
        Record::Student(x) => Some(&x.id),
        Record::Class(x) => Some(&x.id),
        Record::Plan(x) => Some(&x.id),
        Record::Exam(x) => Some(&x.id),
        Record::Expense(x) => Some(&x.id),
        Record::Notification(x) => Some(&x.id),
        _ => None,
    }
}

fn student_of(r: &Record) -> Option<&str> {
    match r {
        Record::Attendance(x) => Some(&x.student_id),
        Record::Exam(x) => Some(&x.student_id),
        Record::Financial(x) => Some(&x.student_id),
        _ => None,
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_all(&self, kinds: &[EntityKind]) -> Result<Snapshot> {
        let tables = self.tables.read().await;
        Ok(kinds
            .iter()
            .map(|k| (*k, tables.get(k).cloned().unwrap_or_default()))
            .collect())
    }

    async fn upsert(&self, kind: EntityKind, records: Vec<Record>) -> Result<()> {
        check_kinds(kind, &records)?;
        self.check_write().await?;
        let mut tables = self.tables.write().await;
        let rows = tables.entry(kind).or_default();
        for r in records {
            upsert_into(rows, r);
        }
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, selector: Selector) -> Result<usize> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;
        let rows = tables.entry(kind).or_default();
        let before = rows.len();
        match selector {
            Selector::All => rows.clear(),
            Selector::Id(id) => rows.retain(|r| id_of(r) != Some(id.as_str())),
            Selector::Ids(ids) => rows.retain(|r| !id_of(r).is_some_and(|i| ids.iter().any(|x| x == i))),
            Selector::Student(sid) => rows.retain(|r| student_of(r) != Some(sid.as_str())),
        }
        Ok(before - rows.len())
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        let tables = self.tables.read().await;
        Ok(tables.get(&kind).and_then(|rows| {
            rows.iter()
                .find(|r| kind.conflict_key() == ConflictKey::Singleton || id_of(r) == Some(id))
                .cloned()
        }))
    }
}
