//! Last-synchronized snapshot of every record collection.
//!
//! Collections are replaced wholesale by [`RecordStore::load`]. The `patch_*`
//! helpers are only ever called after the persistence backend has confirmed
//! the matching write.

use std::collections::HashMap;
use std::iter::Filter;
use std::slice;

use crate::error::{CoreError, Result};
use crate::finance::FeeTable;
use crate::model::{AttendanceEvent, Class, ExamEvent, Expense, FinancialEvent, Plan, Student};
use crate::money::Money;
use crate::persistence::{EntityKind, Record};

#[derive(Debug, Default)]
pub struct RecordStore {
    students: Vec<Student>,
    classes: Vec<Class>,
    plans: Vec<Plan>,
    attendance: Vec<AttendanceEvent>,
    exams: Vec<ExamEvent>,
    financials: Vec<FinancialEvent>,
    expenses: Vec<Expense>,
}

macro_rules! collect_kind {
    ($records:expr, $variant:ident, $kind:expr) => {{
        let expected: EntityKind = $kind;
        $records
            .into_iter()
            .filter_map(|r| match r {
                Record::$variant(x) => Some(x),
                other => {
                    let got = other.kind();
                    tracing::warn!(%expected, %got, "skipping mismatched record");
                    None
                }
            })
            .collect()
    }};
}

impl RecordStore {
    /// Replaces the whole collection for `kind`.
    ///
    /// Settings and notifications are not held here; loading them is a no-op.
    pub fn load(&mut self, kind: EntityKind, records: Vec<Record>) {
        match kind {
            EntityKind::Student => self.students = collect_kind!(records, Student, kind),
            EntityKind::Class => self.classes = collect_kind!(records, Class, kind),
            EntityKind::Plan => self.plans = collect_kind!(records, Plan, kind),
            EntityKind::Attendance => self.attendance = collect_kind!(records, Attendance, kind),
            EntityKind::Exam => self.exams = collect_kind!(records, Exam, kind),
            EntityKind::Financial => self.financials = collect_kind!(records, Financial, kind),
            EntityKind::Expense => self.expenses = collect_kind!(records, Expense, kind),
            EntityKind::Settings | EntityKind::Notification => {
                tracing::debug!(%kind, "record store does not hold this kind");
            }
        }
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn attendance(&self) -> &[AttendanceEvent] {
        &self.attendance
    }

    pub fn exams(&self) -> &[ExamEvent] {
        &self.exams
    }

    pub fn financials(&self) -> &[FinancialEvent] {
        &self.financials
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    /// Lazily filtered view over the students, in listing order.
    pub fn find_students<P>(&self, pred: P) -> Filter<slice::Iter<'_, Student>, P>
    where
        P: FnMut(&&Student) -> bool,
    {
        self.students.iter().filter(pred)
    }

    pub fn students_in_class(&self, class_id: &str) -> Vec<&Student> {
        self.find_students(|s| s.class_id.as_deref() == Some(class_id))
            .collect()
    }

    pub fn student(&self, id: &str) -> Result<&Student> {
        self.students
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::not_found(EntityKind::Student, id))
    }

    pub fn class(&self, id: &str) -> Result<&Class> {
        self.classes
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CoreError::not_found(EntityKind::Class, id))
    }

    pub fn plan(&self, id: &str) -> Result<&Plan> {
        self.plans
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| CoreError::not_found(EntityKind::Plan, id))
    }

    /// Class fee per student in listing order; no class (or a dangling one) owes nothing.
    pub fn fee_table(&self) -> FeeTable {
        let class_fees: HashMap<&str, Money> =
            self.classes.iter().map(|c| (c.id.as_str(), c.fee)).collect();
        FeeTable::new(
            self.students
                .iter()
                .map(|s| {
                    let fee = s
                        .class_id
                        .as_deref()
                        .and_then(|cid| class_fees.get(cid).copied())
                        .unwrap_or(Money::ZERO);
                    (s.id.clone(), fee)
                })
                .collect(),
        )
    }

    pub fn patch_student(&mut self, student: Student) {
        upsert_by(&mut self.students, student, |a, b| a.id == b.id);
    }

    /// Drops the student and every record that references it.
    pub fn patch_remove_student(&mut self, id: &str) {
        self.students.retain(|s| s.id != id);
        self.attendance.retain(|a| a.student_id != id);
        self.exams.retain(|e| e.student_id != id);
        self.financials.retain(|f| f.student_id != id);
    }

    pub fn patch_class(&mut self, class: Class) {
        upsert_by(&mut self.classes, class, |a, b| a.id == b.id);
    }

    pub fn patch_remove_class(&mut self, id: &str) {
        self.classes.retain(|c| c.id != id);
        for s in self.students.iter_mut() {
            if s.class_id.as_deref() == Some(id) {
                s.class_id = None;
            }
        }
    }

    pub fn patch_plan(&mut self, plan: Plan) {
        upsert_by(&mut self.plans, plan, |a, b| a.id == b.id);
    }

    pub fn patch_remove_plan(&mut self, id: &str) {
        self.plans.retain(|p| p.id != id);
        for s in self.students.iter_mut() {
            if s.plan_id.as_deref() == Some(id) {
                s.plan_id = None;
            }
        }
    }

    pub fn patch_attendance(&mut self, events: impl IntoIterator<Item = AttendanceEvent>) {
        for e in events {
            upsert_by(&mut self.attendance, e, |a, b| {
                a.student_id == b.student_id && a.date == b.date
            });
        }
    }

    pub fn patch_exam(&mut self, exam: ExamEvent) {
        upsert_by(&mut self.exams, exam, |a, b| a.id == b.id);
    }

    pub fn patch_financials(&mut self, events: impl IntoIterator<Item = FinancialEvent>) {
        for e in events {
            upsert_by(&mut self.financials, e, |a, b| {
                a.student_id == b.student_id && a.month == b.month
            });
        }
    }

    pub fn patch_expense(&mut self, expense: Expense) {
        upsert_by(&mut self.expenses, expense, |a, b| a.id == b.id);
    }

    pub fn patch_remove_expense(&mut self, id: &str) {
        self.expenses.retain(|e| e.id != id);
    }
}

fn upsert_by<T>(rows: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) {
    match rows.iter_mut().find(|r| same(r, &item)) {
        Some(slot) => *slot = item,
        None => rows.push(item),
    }
}
