//! Read-only dashboard queries composed from the store and the indexes.

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Reverse;

use crate::attendance::AttendanceIndex;
use crate::exams::ExamIndex;
use crate::finance::FinancialIndex;
use crate::model::{AttendanceStatus, MonthKey};
use crate::money::Money;
use crate::progress::ProgressIndex;
use crate::store::RecordStore;

#[derive(Clone, Copy)]
pub struct Aggregates<'a> {
    pub store: &'a RecordStore,
    pub progress: &'a ProgressIndex,
    pub attendance: &'a AttendanceIndex,
    pub finance: &'a FinancialIndex,
    pub exams: &'a ExamIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRank {
    pub student_id: String,
    pub name: String,
    pub class_id: Option<String>,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCount {
    pub class_id: String,
    pub name: String,
    pub students: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_students: usize,
    pub total_classes: usize,
    pub present_today: usize,
    pub absent_today: usize,
    pub total_pages: usize,
    pub exams_recorded: usize,
    pub average_exam_percent: u32,
    pub month: MonthKey,
    pub income: Money,
    pub pending: Money,
    pub expenses: Money,
    pub net: Money,
}

impl<'a> Aggregates<'a> {
    /// Highest page totals first; equal totals keep listing order.
    pub fn top_students_by_progress(&self, n: usize) -> Vec<StudentRank> {
        let mut ranked: Vec<StudentRank> = self
            .store
            .students()
            .iter()
            .map(|s| StudentRank {
                student_id: s.id.clone(),
                name: s.name.clone(),
                class_id: s.class_id.clone(),
                total_pages: self.progress.total_completed(&s.id),
            })
            .collect();
        ranked.sort_by_key(|r| Reverse(r.total_pages));
        ranked.truncate(n);
        ranked
    }

    /// `round(100 * Σtotal / Σmax)`, half up; 0 when nothing has been scored.
    pub fn average_exam_score_percent(&self) -> u32 {
        let (total, max) = self.exams.score_sums();
        if max == 0 {
            return 0;
        }
        let pct = (200 * total + max) / (2 * max);
        u32::try_from(pct).unwrap_or(u32::MAX)
    }

    pub fn class_distribution(&self) -> Vec<ClassCount> {
        self.store
            .classes()
            .iter()
            .map(|c| ClassCount {
                class_id: c.id.clone(),
                name: c.name.clone(),
                students: self
                    .store
                    .find_students(|s| s.class_id.as_deref() == Some(c.id.as_str()))
                    .count(),
            })
            .collect()
    }

    pub fn total_pages(&self) -> usize {
        self.store
            .students()
            .iter()
            .map(|s| self.progress.total_completed(&s.id))
            .sum()
    }

    pub fn summary(&self, today: NaiveDate) -> DashboardSummary {
        let month = MonthKey::of(today);
        let fees = self.store.fee_table();
        let finance = self.finance.summary(month, &fees);
        DashboardSummary {
            total_students: self.store.students().len(),
            total_classes: self.store.classes().len(),
            present_today: self
                .attendance
                .count_by_status(today, AttendanceStatus::Present),
            absent_today: self
                .attendance
                .count_by_status(today, AttendanceStatus::Absent),
            total_pages: self.total_pages(),
            exams_recorded: self.exams.len(),
            average_exam_percent: self.average_exam_score_percent(),
            month,
            income: finance.income,
            pending: finance.pending,
            expenses: finance.expenses,
            net: finance.net,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Class, ExamEvent, Student};
    use crate::persistence::{EntityKind, Record};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use crate::progress::tests::Apply;

    struct Fixture {
        store: RecordStore,
        progress: ProgressIndex,
        attendance: AttendanceIndex,
        finance: FinancialIndex,
        exams: ExamIndex,
    }

    impl Fixture {
        fn new(students: Vec<Student>, classes: Vec<Class>) -> Self {
            let mut store = RecordStore::default();
            store.load(
                EntityKind::Student,
                students.into_iter().map(Record::Student).collect(),
            );
            store.load(
                EntityKind::Class,
                classes.into_iter().map(Record::Class).collect(),
            );
            let progress = ProgressIndex::rebuild(store.students());
            Fixture {
                store,
                progress,
                attendance: AttendanceIndex::default(),
                finance: FinancialIndex::default(),
                exams: ExamIndex::default(),
            }
        }

        fn agg(&self) -> Aggregates<'_> {
            Aggregates {
                store: &self.store,
                progress: &self.progress,
                attendance: &self.attendance,
                finance: &self.finance,
                exams: &self.exams,
            }
        }
    }

    fn student(id: &str, class: Option<&str>) -> Student {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": format!("Student {}", id),
            "classId": class,
        }))
        .unwrap()
    }

    fn class(id: &str) -> Class {
        serde_json::from_value(serde_json::json!({ "id": id, "name": id, "fee": "100" })).unwrap()
    }

    fn exam(id: &str, total: u32, max: u32) -> ExamEvent {
        ExamEvent {
            id: id.to_string(),
            student_id: "a".to_string(),
            name: "Exam".to_string(),
            unit: 1,
            scores: BTreeMap::new(),
            total_score: total,
            max_score: max,
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn average_is_zero_without_exams() {
        let fx = Fixture::new(vec![student("a", None)], vec![]);
        assert_eq!(fx.agg().average_exam_score_percent(), 0);
    }

    #[test]
    fn average_rounds_half_up() {
        let mut fx = Fixture::new(vec![student("a", None)], vec![]);
        fx.exams.add(exam("e1", 1, 8));
        // 12.5% rounds to 13
        assert_eq!(fx.agg().average_exam_score_percent(), 13);
        fx.exams.add(exam("e2", 2, 3));
        // 3 / 11 = 27.27%
        assert_eq!(fx.agg().average_exam_score_percent(), 27);
    }

    #[test]
    fn ranking_is_stable_and_matches_totals() {
        let mut fx = Fixture::new(
            vec![student("a", None), student("b", None), student("c", None)],
            vec![],
        );
        fx.progress.mark_range("b", 1, 1, 4).unwrap();
        fx.progress.mark_range("c", 2, 1, 2).unwrap();
        fx.progress.mark_range("a", 30, 19, 20).unwrap();

        let top = fx.agg().top_students_by_progress(3);
        let ids: Vec<&str> = top.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        for r in &top {
            let per_unit: usize = (1..=30)
                .map(|u| fx.progress.completed_count(&r.student_id, u))
                .sum();
            assert_eq!(r.total_pages, per_unit);
        }
        assert_eq!(fx.agg().top_students_by_progress(1).len(), 1);
        assert_eq!(fx.agg().total_pages(), 8);
    }

    #[test]
    fn distribution_includes_empty_classes() {
        let fx = Fixture::new(
            vec![student("a", Some("c1")), student("b", Some("c1")), student("z", None)],
            vec![class("c1"), class("c2")],
        );
        let dist = fx.agg().class_distribution();
        assert_eq!(dist.len(), 2);
        assert_eq!(dist[0].students, 2);
        assert_eq!(dist[1].class_id, "c2");
        assert_eq!(dist[1].students, 0);
    }

    #[test]
    fn summary_counts_today_and_current_month() {
        let mut fx = Fixture::new(
            vec![student("a", Some("c1")), student("b", Some("c1"))],
            vec![class("c1")],
        );
        let today = NaiveDate::from_ymd_opt(2024, 9, 14).unwrap();
        fx.attendance.set_status(today, "a", AttendanceStatus::Present);
        fx.attendance.set_status(today, "b", AttendanceStatus::Absent);
        fx.finance.set_status(
            MonthKey::of(today),
            "a",
            crate::model::PaymentStatus::Paid,
        );

        let s = fx.agg().summary(today);
        assert_eq!(s.total_students, 2);
        assert_eq!(s.present_today, 1);
        assert_eq!(s.absent_today, 1);
        assert_eq!(s.income, Money::from_major(100));
        assert_eq!(s.pending, Money::from_major(100));
        assert_eq!(s.net, Money::from_major(100));
    }
}
