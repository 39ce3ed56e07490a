//! The active session: record store, derived indexes and the persistence
//! backend they are synchronized with.
//!
//! Every mutation validates first, writes through [`Persistence`] and only
//! then patches the in-memory state. A failed write leaves memory untouched.
//! Mutations that need more than one write resync from the backend when a
//! later write fails, then report the original error.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::Aggregates;
use crate::attendance::AttendanceIndex;
use crate::error::{CoreError, Result};
use crate::exams::{score_exam, ExamIndex};
use crate::finance::FinancialIndex;
use crate::model::{
    AttendanceEvent, AttendanceStatus, Class, ExamEvent, ExamField, Expense, FinancialEvent,
    MonthKey, Notification, NotificationKind, PaymentStatus, Plan, Settings, Student, Theme,
};
use crate::money::Money;
use crate::persistence::{EntityKind, Persistence, Record, Selector, Snapshot};
use crate::progress::{validate_unit, Progress, ProgressIndex};
use crate::store::RecordStore;

pub const NOTIFICATION_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub guardian_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub enrolled_on: Option<NaiveDate>,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub start_unit: Option<u8>,
    #[serde(default)]
    pub notes: String,
}

/// Partial student update. Absent keys keep the stored value; an explicit
/// `null` clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub age: Option<Option<u32>>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub enrolled_on: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present")]
    pub class_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub plan_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub start_unit: Option<Option<u8>>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn present<'de, D, T>(d: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInput {
    pub name: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub fee: Money,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pages_per_week: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressChange {
    pub unit: u8,
    pub added: usize,
    pub completed_in_unit: usize,
    pub total_completed: usize,
}

pub struct Session {
    persistence: Arc<dyn Persistence>,
    store: RecordStore,
    progress: ProgressIndex,
    attendance: AttendanceIndex,
    finance: FinancialIndex,
    exams: ExamIndex,
    settings: Settings,
    /// Newest first.
    notifications: Vec<Notification>,
}

struct Loaded {
    store: RecordStore,
    progress: ProgressIndex,
    attendance: AttendanceIndex,
    finance: FinancialIndex,
    exams: ExamIndex,
    settings: Settings,
    notifications: Vec<Notification>,
}

fn build(mut snapshot: Snapshot) -> Loaded {
    let settings = snapshot
        .remove(&EntityKind::Settings)
        .unwrap_or_default()
        .into_iter()
        .find_map(|r| match r {
            Record::Settings(s) => Some(s),
            _ => None,
        })
        .unwrap_or_default();
    let mut notifications: Vec<Notification> = snapshot
        .remove(&EntityKind::Notification)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| match r {
            Record::Notification(n) => Some(n),
            _ => None,
        })
        .collect();
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    notifications.truncate(NOTIFICATION_LIMIT);

    let mut store = RecordStore::default();
    for (kind, records) in snapshot {
        store.load(kind, records);
    }

    Loaded {
        progress: ProgressIndex::rebuild(store.students()),
        attendance: AttendanceIndex::rebuild(store.attendance()),
        finance: FinancialIndex::rebuild(store.financials(), store.expenses()),
        exams: ExamIndex::rebuild(store.exams()),
        store,
        settings,
        notifications,
    }
}

fn require_name(name: &str, what: &str) -> Result<String> {
    let t = name.trim();
    if t.is_empty() {
        return Err(CoreError::validation(format!("{} name must not be empty", what)));
    }
    Ok(t.to_string())
}

impl Session {
    /// Opens a session with a full load from `persistence`.
    pub async fn open(persistence: Arc<dyn Persistence>) -> Result<Self> {
        let loaded = build(persistence.load_all(&EntityKind::ALL).await?);
        info!(
            students = loaded.store.students().len(),
            classes = loaded.store.classes().len(),
            "session loaded"
        );
        Ok(Session {
            persistence,
            store: loaded.store,
            progress: loaded.progress,
            attendance: loaded.attendance,
            finance: loaded.finance,
            exams: loaded.exams,
            settings: loaded.settings,
            notifications: loaded.notifications,
        })
    }

    /// Full resync from the backend. On failure the current state is kept.
    pub async fn reload(&mut self) -> Result<()> {
        let snapshot = self.persistence.load_all(&EntityKind::ALL).await?;
        self.install(build(snapshot));
        info!(students = self.store.students().len(), "session reloaded");
        Ok(())
    }

    fn install(&mut self, loaded: Loaded) {
        self.store = loaded.store;
        self.progress = loaded.progress;
        self.attendance = loaded.attendance;
        self.finance = loaded.finance;
        self.exams = loaded.exams;
        self.settings = loaded.settings;
        self.notifications = loaded.notifications;
    }

    /// Deletes every record of every kind, settings included. Dependent
    /// records are deleted before the students they reference.
    pub async fn reset_all(&mut self) -> Result<usize> {
        const ORDER: [EntityKind; 9] = [
            EntityKind::Expense,
            EntityKind::Financial,
            EntityKind::Attendance,
            EntityKind::Exam,
            EntityKind::Notification,
            EntityKind::Student,
            EntityKind::Class,
            EntityKind::Plan,
            EntityKind::Settings,
        ];
        let mut removed = 0;
        for (i, kind) in ORDER.into_iter().enumerate() {
            match self.persistence.delete(kind, Selector::All).await {
                Ok(n) => removed += n,
                Err(e) if i == 0 => return Err(e.into()),
                Err(e) => return Err(self.resync_after(e.into()).await),
            }
        }
        self.install(build(Snapshot::new()));
        warn!(removed, "all workspace data reset");
        Ok(removed)
    }

    async fn resync_after(&mut self, error: CoreError) -> CoreError {
        warn!(%error, "mutation failed part-way; resynchronizing from storage");
        if let Err(reload_err) = self.reload().await {
            warn!(error = %reload_err, "resync failed; in-memory state may be stale");
        }
        error
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn progress(&self) -> &ProgressIndex {
        &self.progress
    }

    pub fn attendance(&self) -> &AttendanceIndex {
        &self.attendance
    }

    pub fn finance(&self) -> &FinancialIndex {
        &self.finance
    }

    pub fn exams(&self) -> &ExamIndex {
        &self.exams
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn aggregates(&self) -> Aggregates<'_> {
        Aggregates {
            store: &self.store,
            progress: &self.progress,
            attendance: &self.attendance,
            finance: &self.finance,
            exams: &self.exams,
        }
    }

    fn check_student_refs(&self, input: &StudentInput) -> Result<()> {
        if let Some(cid) = input.class_id.as_deref() {
            self.store.class(cid)?;
        }
        if let Some(pid) = input.plan_id.as_deref() {
            self.store.plan(pid)?;
        }
        if let Some(unit) = input.start_unit {
            validate_unit(unit)?;
        }
        Ok(())
    }

    pub async fn create_student(&mut self, input: StudentInput) -> Result<Student> {
        let name = require_name(&input.name, "student")?;
        self.check_student_refs(&input)?;
        let student = Student {
            id: Uuid::new_v4().to_string(),
            name,
            age: input.age,
            guardian_name: input.guardian_name.trim().to_string(),
            phone: input.phone.trim().to_string(),
            country_code: input.country_code.trim().to_string(),
            enrolled_on: input.enrolled_on,
            class_id: input.class_id,
            plan_id: input.plan_id,
            start_unit: input.start_unit,
            notes: input.notes,
            progress: Progress::new(),
        };

        self.persistence
            .upsert(EntityKind::Student, vec![Record::Student(student.clone())])
            .await?;
        self.progress.commit(&student.id, Progress::new());
        self.store.patch_student(student.clone());
        info!(student_id = %student.id, "student created");
        self.notify(NotificationKind::Success, format!("Student {} added", student.name))
            .await;
        Ok(student)
    }

    /// Applies only the fields present in `patch`.
    pub async fn update_student(&mut self, id: &str, patch: StudentPatch) -> Result<Student> {
        let mut student = self.store.student(id)?.clone();
        if let Some(name) = patch.name.as_deref() {
            student.name = require_name(name, "student")?;
        }
        let class_id = patch.class_id.map(|c| c.filter(|c| !c.trim().is_empty()));
        let plan_id = patch.plan_id.map(|p| p.filter(|p| !p.trim().is_empty()));
        if let Some(Some(cid)) = &class_id {
            self.store.class(cid)?;
        }
        if let Some(Some(pid)) = &plan_id {
            self.store.plan(pid)?;
        }
        if let Some(Some(unit)) = patch.start_unit {
            validate_unit(unit)?;
        }
        if let Some(age) = patch.age {
            student.age = age;
        }
        if let Some(g) = patch.guardian_name {
            student.guardian_name = g.trim().to_string();
        }
        if let Some(p) = patch.phone {
            student.phone = p.trim().to_string();
        }
        if let Some(c) = patch.country_code {
            student.country_code = c.trim().to_string();
        }
        if let Some(d) = patch.enrolled_on {
            student.enrolled_on = d;
        }
        if let Some(cid) = class_id {
            student.class_id = cid;
        }
        if let Some(pid) = plan_id {
            student.plan_id = pid;
        }
        if let Some(unit) = patch.start_unit {
            student.start_unit = unit;
        }
        if let Some(notes) = patch.notes {
            student.notes = notes;
        }
        student.progress = self.progress.staged(id)?;

        self.persistence
            .upsert(EntityKind::Student, vec![Record::Student(student.clone())])
            .await?;
        self.store.patch_student(student.clone());
        info!(student_id = %id, "student updated");
        Ok(student)
    }

    /// Removes the student along with their attendance, exam and payment records.
    pub async fn delete_student(&mut self, id: &str) -> Result<()> {
        let name = self.store.student(id)?.name.clone();

        let dependents = [EntityKind::Attendance, EntityKind::Exam, EntityKind::Financial];
        for (i, kind) in dependents.into_iter().enumerate() {
            let deleted = self
                .persistence
                .delete(kind, Selector::Student(id.to_string()))
                .await;
            if let Err(e) = deleted {
                return Err(if i == 0 {
                    e.into()
                } else {
                    self.resync_after(e.into()).await
                });
            }
        }
        let deleted = self
            .persistence
            .delete(EntityKind::Student, Selector::Id(id.to_string()))
            .await;
        if let Err(e) = deleted {
            return Err(self.resync_after(e.into()).await);
        }

        self.store.patch_remove_student(id);
        self.progress.remove(id);
        self.attendance.remove_student(id);
        self.finance.remove_student(id);
        self.exams.remove_student(id);
        info!(student_id = %id, "student deleted");
        self.notify(NotificationKind::Warning, format!("Student {} removed", name))
            .await;
        Ok(())
    }

    /// Moves every listed student into `class_id` (or out of any class when `None`).
    pub async fn assign_class(
        &mut self,
        student_ids: &[String],
        class_id: Option<&str>,
    ) -> Result<usize> {
        if student_ids.is_empty() {
            return Err(CoreError::validation("no students selected"));
        }
        if let Some(cid) = class_id {
            self.store.class(cid)?;
        }
        let mut seen = HashSet::new();
        let mut updated = Vec::new();
        for sid in student_ids {
            if !seen.insert(sid.as_str()) {
                continue;
            }
            let mut s = self.store.student(sid)?.clone();
            s.class_id = class_id.map(str::to_string);
            updated.push(s);
        }

        self.persistence
            .upsert(
                EntityKind::Student,
                updated.iter().cloned().map(Record::Student).collect(),
            )
            .await?;
        let count = updated.len();
        for s in updated {
            self.store.patch_student(s);
        }
        info!(count, class_id = ?class_id, "students reassigned");
        Ok(count)
    }

    pub async fn update_note(&mut self, id: &str, notes: &str) -> Result<Student> {
        let mut student = self.store.student(id)?.clone();
        student.notes = notes.to_string();
        self.persistence
            .upsert(EntityKind::Student, vec![Record::Student(student.clone())])
            .await?;
        self.store.patch_student(student.clone());
        Ok(student)
    }

    fn class_from(id: String, input: ClassInput) -> Result<Class> {
        let name = require_name(&input.name, "class")?;
        if input.fee.is_negative() {
            return Err(CoreError::validation("class fee must not be negative"));
        }
        Ok(Class {
            id,
            name,
            schedule: input.schedule.trim().to_string(),
            fee: input.fee,
            photo: input.photo.filter(|p| !p.trim().is_empty()),
            teacher_id: input.teacher_id.filter(|t| !t.trim().is_empty()),
        })
    }

    pub async fn create_class(&mut self, input: ClassInput) -> Result<Class> {
        let class = Self::class_from(Uuid::new_v4().to_string(), input)?;
        self.persistence
            .upsert(EntityKind::Class, vec![Record::Class(class.clone())])
            .await?;
        self.store.patch_class(class.clone());
        info!(class_id = %class.id, "class created");
        self.notify(NotificationKind::Success, format!("Class {} created", class.name))
            .await;
        Ok(class)
    }

    pub async fn update_class(&mut self, id: &str, input: ClassInput) -> Result<Class> {
        self.store.class(id)?;
        let class = Self::class_from(id.to_string(), input)?;
        self.persistence
            .upsert(EntityKind::Class, vec![Record::Class(class.clone())])
            .await?;
        self.store.patch_class(class.clone());
        Ok(class)
    }

    /// Unassigns every student in the class, then deletes it.
    pub async fn delete_class(&mut self, id: &str) -> Result<usize> {
        let name = self.store.class(id)?.name.clone();
        let unassigned: Vec<Record> = self
            .store
            .students_in_class(id)
            .into_iter()
            .map(|s| {
                let mut s = s.clone();
                s.class_id = None;
                Record::Student(s)
            })
            .collect();
        let count = unassigned.len();

        if count > 0 {
            self.persistence
                .upsert(EntityKind::Student, unassigned)
                .await?;
        }
        let deleted = self
            .persistence
            .delete(EntityKind::Class, Selector::Id(id.to_string()))
            .await;
        if let Err(e) = deleted {
            return Err(if count > 0 {
                self.resync_after(e.into()).await
            } else {
                e.into()
            });
        }

        self.store.patch_remove_class(id);
        info!(class_id = %id, unassigned = count, "class deleted");
        self.notify(NotificationKind::Warning, format!("Class {} deleted", name))
            .await;
        Ok(count)
    }

    fn plan_from(id: String, input: PlanInput) -> Result<Plan> {
        let name = require_name(&input.name, "plan")?;
        if input.pages_per_week == Some(0) {
            return Err(CoreError::validation("pages per week must be positive"));
        }
        Ok(Plan {
            id,
            name,
            description: input.description.trim().to_string(),
            pages_per_week: input.pages_per_week,
        })
    }

    pub async fn create_plan(&mut self, input: PlanInput) -> Result<Plan> {
        let plan = Self::plan_from(Uuid::new_v4().to_string(), input)?;
        self.persistence
            .upsert(EntityKind::Plan, vec![Record::Plan(plan.clone())])
            .await?;
        self.store.patch_plan(plan.clone());
        info!(plan_id = %plan.id, "plan created");
        Ok(plan)
    }

    pub async fn update_plan(&mut self, id: &str, input: PlanInput) -> Result<Plan> {
        self.store.plan(id)?;
        let plan = Self::plan_from(id.to_string(), input)?;
        self.persistence
            .upsert(EntityKind::Plan, vec![Record::Plan(plan.clone())])
            .await?;
        self.store.patch_plan(plan.clone());
        Ok(plan)
    }

    pub async fn delete_plan(&mut self, id: &str) -> Result<usize> {
        self.store.plan(id)?;
        let detached: Vec<Record> = self
            .store
            .find_students(|s| s.plan_id.as_deref() == Some(id))
            .map(|s| {
                let mut s = s.clone();
                s.plan_id = None;
                Record::Student(s)
            })
            .collect();
        let count = detached.len();

        if count > 0 {
            self.persistence.upsert(EntityKind::Student, detached).await?;
        }
        let deleted = self
            .persistence
            .delete(EntityKind::Plan, Selector::Id(id.to_string()))
            .await;
        if let Err(e) = deleted {
            return Err(if count > 0 {
                self.resync_after(e.into()).await
            } else {
                e.into()
            });
        }

        self.store.patch_remove_plan(id);
        info!(plan_id = %id, detached = count, "plan deleted");
        Ok(count)
    }

    async fn persist_progress(&mut self, id: &str, next: Progress) -> Result<()> {
        let mut student = self.store.student(id)?.clone();
        student.progress = next.clone();
        self.persistence
            .upsert(EntityKind::Student, vec![Record::Student(student.clone())])
            .await?;
        self.progress.commit(id, next);
        self.store.patch_student(student);
        Ok(())
    }

    fn progress_change(&self, id: &str, unit: u8, added: usize) -> ProgressChange {
        ProgressChange {
            unit,
            added,
            completed_in_unit: self.progress.completed_count(id, unit),
            total_completed: self.progress.total_completed(id),
        }
    }

    pub async fn mark_range(
        &mut self,
        id: &str,
        unit: u8,
        from: u8,
        to: u8,
    ) -> Result<ProgressChange> {
        let (next, added) = self.progress.stage_mark_range(id, unit, from, to)?;
        if added > 0 {
            self.persist_progress(id, next).await?;
        }
        Ok(self.progress_change(id, unit, added))
    }

    /// Returns whether the page is now completed.
    pub async fn toggle_page(&mut self, id: &str, unit: u8, page: u8) -> Result<bool> {
        let (next, now_set) = self.progress.stage_toggle_page(id, unit, page)?;
        self.persist_progress(id, next).await?;
        Ok(now_set)
    }

    pub async fn save_attendance(
        &mut self,
        date: NaiveDate,
        statuses: &BTreeMap<String, AttendanceStatus>,
    ) -> Result<usize> {
        if statuses.is_empty() {
            return Ok(0);
        }
        for sid in statuses.keys() {
            self.store.student(sid)?;
        }
        let events: Vec<AttendanceEvent> = statuses
            .iter()
            .map(|(sid, status)| AttendanceEvent {
                date,
                student_id: sid.clone(),
                status: *status,
            })
            .collect();

        self.persistence
            .upsert(
                EntityKind::Attendance,
                events.iter().cloned().map(Record::Attendance).collect(),
            )
            .await?;
        self.attendance
            .bulk_set_statuses(date, statuses.iter().map(|(k, v)| (k.as_str(), *v)));
        self.store.patch_attendance(events);
        info!(%date, count = statuses.len(), "attendance saved");
        self.notify(NotificationKind::Info, format!("Attendance saved for {}", date))
            .await;
        Ok(statuses.len())
    }

    pub async fn record_exam(
        &mut self,
        student_id: &str,
        name: &str,
        unit: u8,
        raw_scores: &BTreeMap<String, i64>,
    ) -> Result<ExamEvent> {
        let exam_name = require_name(name, "exam")?;
        validate_unit(unit)?;
        let student_name = self.store.student(student_id)?.name.clone();
        let scored = score_exam(&self.settings.exam_fields, raw_scores)?;
        let exam = ExamEvent {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            name: exam_name,
            unit,
            scores: scored.scores,
            total_score: scored.total_score,
            max_score: scored.max_score,
            taken_at: Utc::now(),
        };

        self.persistence
            .upsert(EntityKind::Exam, vec![Record::Exam(exam.clone())])
            .await?;
        self.exams.add(exam.clone());
        self.store.patch_exam(exam.clone());
        info!(exam_id = %exam.id, %student_id, "exam recorded");
        self.notify(
            NotificationKind::Success,
            format!(
                "{} scored {}/{} in {}",
                student_name, exam.total_score, exam.max_score, exam.name
            ),
        )
        .await;
        Ok(exam)
    }

    pub async fn save_financials(
        &mut self,
        month: MonthKey,
        statuses: &BTreeMap<String, PaymentStatus>,
    ) -> Result<usize> {
        if statuses.is_empty() {
            return Ok(0);
        }
        for sid in statuses.keys() {
            self.store.student(sid)?;
        }
        let events: Vec<FinancialEvent> = statuses
            .iter()
            .map(|(sid, status)| FinancialEvent {
                month,
                student_id: sid.clone(),
                status: *status,
            })
            .collect();

        self.persistence
            .upsert(
                EntityKind::Financial,
                events.iter().cloned().map(Record::Financial).collect(),
            )
            .await?;
        self.finance
            .bulk_set_statuses(month, statuses.iter().map(|(k, v)| (k.as_str(), *v)));
        self.store.patch_financials(events);
        info!(%month, count = statuses.len(), "payment statuses saved");
        self.notify(
            NotificationKind::Info,
            format!("Payment statuses saved for {}", month),
        )
        .await;
        Ok(statuses.len())
    }

    pub async fn add_expense(
        &mut self,
        description: &str,
        amount: Money,
        date: NaiveDate,
    ) -> Result<Expense> {
        let description = description.trim();
        if description.is_empty() {
            return Err(CoreError::validation("expense description must not be empty"));
        }
        if !amount.is_positive() {
            return Err(CoreError::validation("expense amount must be positive"));
        }
        let expense = Expense {
            id: Uuid::new_v4().to_string(),
            description: description.to_string(),
            amount,
            date,
        };
        self.persistence
            .upsert(EntityKind::Expense, vec![Record::Expense(expense.clone())])
            .await?;
        self.finance.add_expense(expense.clone());
        self.store.patch_expense(expense.clone());
        info!(expense_id = %expense.id, %amount, "expense added");
        self.notify(
            NotificationKind::Info,
            format!("Expense recorded: {} ({})", expense.description, amount),
        )
        .await;
        Ok(expense)
    }

    pub async fn delete_expense(&mut self, id: &str) -> Result<()> {
        if !self.finance.expenses().iter().any(|e| e.id == id) {
            return Err(CoreError::not_found(EntityKind::Expense, id));
        }
        self.persistence
            .delete(EntityKind::Expense, Selector::Id(id.to_string()))
            .await?;
        self.finance.remove_expense(id);
        self.store.patch_remove_expense(id);
        Ok(())
    }

    async fn save_settings(&mut self, next: Settings) -> Result<()> {
        self.persistence
            .upsert(EntityKind::Settings, vec![Record::Settings(next.clone())])
            .await?;
        self.settings = next;
        Ok(())
    }

    pub async fn update_appearance(
        &mut self,
        theme: Option<Theme>,
        accent_color: Option<&str>,
    ) -> Result<Settings> {
        let mut next = self.settings.clone();
        if let Some(t) = theme {
            next.theme = t;
        }
        if let Some(c) = accent_color {
            next.accent_color = parse_hex_color(c)?;
        }
        self.save_settings(next).await?;
        Ok(self.settings.clone())
    }

    pub async fn set_currency(&mut self, code: &str) -> Result<Settings> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() || code.len() > 8 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CoreError::validation(format!(
                "currency must be a short alphabetic code, got {:?}",
                code
            )));
        }
        let mut next = self.settings.clone();
        next.currency = code;
        self.save_settings(next).await?;
        info!(currency = %self.settings.currency, "currency changed");
        Ok(self.settings.clone())
    }

    pub async fn add_exam_field(&mut self, name: &str, max_mark: u32) -> Result<Settings> {
        let name = require_name(name, "exam field")?;
        if max_mark == 0 {
            return Err(CoreError::validation("exam field max mark must be positive"));
        }
        if self
            .settings
            .exam_fields
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(&name))
        {
            return Err(CoreError::validation(format!(
                "exam field {:?} already exists",
                name
            )));
        }
        let mut next = self.settings.clone();
        next.exam_fields.push(ExamField { name, max_mark });
        self.save_settings(next).await?;
        Ok(self.settings.clone())
    }

    pub async fn remove_exam_field(&mut self, index: usize) -> Result<Settings> {
        let len = self.settings.exam_fields.len();
        if index >= len {
            return Err(CoreError::validation(format!(
                "exam field index {} out of range (have {})",
                index, len
            )));
        }
        if len == 1 {
            return Err(CoreError::validation("at least one exam field is required"));
        }
        let mut next = self.settings.clone();
        next.exam_fields.remove(index);
        self.save_settings(next).await?;
        Ok(self.settings.clone())
    }

    /// Records an activity entry. A failed write is logged and otherwise ignored.
    async fn notify(&mut self, kind: NotificationKind, message: String) {
        let n = Notification {
            id: Uuid::new_v4().to_string(),
            message,
            kind,
            is_read: false,
            created_at: Utc::now(),
        };
        match self
            .persistence
            .upsert(EntityKind::Notification, vec![Record::Notification(n.clone())])
            .await
        {
            Ok(()) => self.notifications.insert(0, n),
            Err(e) => {
                warn!(error = %e, "failed to record notification");
                return;
            }
        }
        if self.notifications.len() <= NOTIFICATION_LIMIT {
            return;
        }
        let stale: Vec<String> = self
            .notifications
            .split_off(NOTIFICATION_LIMIT)
            .into_iter()
            .map(|n| n.id)
            .collect();
        if let Err(e) = self
            .persistence
            .delete(EntityKind::Notification, Selector::Ids(stale))
            .await
        {
            warn!(error = %e, "failed to prune old notifications");
        }
    }

    /// Deletes the whole activity feed. Returns how many entries went.
    pub async fn clear_notifications(&mut self) -> Result<usize> {
        self.persistence
            .delete(EntityKind::Notification, Selector::All)
            .await?;
        let cleared = self.notifications.len();
        self.notifications.clear();
        info!(cleared, "notifications cleared");
        Ok(cleared)
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    pub async fn mark_notification_read(&mut self, id: &str) -> Result<()> {
        let Some(pos) = self.notifications.iter().position(|n| n.id == id) else {
            return Err(CoreError::not_found(EntityKind::Notification, id));
        };
        if self.notifications[pos].is_read {
            return Ok(());
        }
        let mut n = self.notifications[pos].clone();
        n.is_read = true;
        self.persistence
            .upsert(EntityKind::Notification, vec![Record::Notification(n.clone())])
            .await?;
        self.notifications[pos] = n;
        Ok(())
    }

    pub async fn mark_all_notifications_read(&mut self) -> Result<usize> {
        let unread: Vec<Record> = self
            .notifications
            .iter()
            .filter(|n| !n.is_read)
            .map(|n| {
                let mut n = n.clone();
                n.is_read = true;
                Record::Notification(n)
            })
            .collect();
        let count = unread.len();
        if count == 0 {
            return Ok(0);
        }
        self.persistence
            .upsert(EntityKind::Notification, unread)
            .await?;
        for n in self.notifications.iter_mut() {
            n.is_read = true;
        }
        Ok(count)
    }
}

fn parse_hex_color(raw: &str) -> Result<String> {
    let t = raw.trim();
    let hex = t.strip_prefix('#').unwrap_or(t);
    if (hex.len() == 6 || hex.len() == 3) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(format!("#{}", hex.to_ascii_lowercase()))
    } else {
        Err(CoreError::validation(format!(
            "accent color must be a hex color like #0d9488, got {:?}",
            raw
        )))
    }
}
