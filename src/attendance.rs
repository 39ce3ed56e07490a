use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::model::{AttendanceEvent, AttendanceStatus, MonthKey, Student};

/// date → student → status, grouped from flat attendance events.
#[derive(Debug, Default)]
pub struct AttendanceIndex {
    by_date: BTreeMap<NaiveDate, HashMap<String, AttendanceStatus>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    pub student_id: String,
    pub student_name: String,
    pub cells: Vec<Option<AttendanceStatus>>,
    pub symbols: Vec<&'static str>,
    pub present: usize,
    pub absent: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyMatrix {
    pub month: MonthKey,
    pub days_in_month: u32,
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyAttendance {
    pub month: MonthKey,
    pub present: usize,
    pub absent: usize,
}

const UNSET_SYMBOL: &str = "-";

impl AttendanceIndex {
    pub fn rebuild<'a>(events: impl IntoIterator<Item = &'a AttendanceEvent>) -> Self {
        let mut idx = AttendanceIndex::default();
        for e in events {
            idx.set_status(e.date, &e.student_id, e.status);
        }
        idx
    }

    pub fn set_status(&mut self, date: NaiveDate, student_id: &str, status: AttendanceStatus) {
        self.by_date
            .entry(date)
            .or_default()
            .insert(student_id.to_string(), status);
    }

    pub fn bulk_set_statuses<'a>(
        &mut self,
        date: NaiveDate,
        statuses: impl IntoIterator<Item = (&'a str, AttendanceStatus)>,
    ) {
        let day = self.by_date.entry(date).or_default();
        for (student_id, status) in statuses {
            day.insert(student_id.to_string(), status);
        }
    }

    pub fn status_on(&self, date: NaiveDate, student_id: &str) -> Option<AttendanceStatus> {
        self.by_date
            .get(&date)
            .and_then(|day| day.get(student_id))
            .copied()
    }

    /// Statuses recorded on `date`; empty when nothing was recorded.
    pub fn day(&self, date: NaiveDate) -> HashMap<String, AttendanceStatus> {
        self.by_date.get(&date).cloned().unwrap_or_default()
    }

    pub fn count_by_status(&self, date: NaiveDate, status: AttendanceStatus) -> usize {
        self.by_date
            .get(&date)
            .map(|day| day.values().filter(|s| **s == status).count())
            .unwrap_or(0)
    }

    pub fn remove_student(&mut self, student_id: &str) {
        for day in self.by_date.values_mut() {
            day.remove(student_id);
        }
        self.by_date.retain(|_, day| !day.is_empty());
    }

    /// Students × days grid for one month. `students` is the class roster in listing order.
    pub fn monthly_matrix(&self, students: &[&Student], month: MonthKey) -> MonthlyMatrix {
        let days = month.days();
        let dates: Vec<Option<NaiveDate>> = (1..=days).map(|d| month.day(d)).collect();

        let rows = students
            .iter()
            .map(|s| {
                let cells: Vec<Option<AttendanceStatus>> = dates
                    .iter()
                    .map(|d| d.and_then(|d| self.status_on(d, &s.id)))
                    .collect();
                let present = cells
                    .iter()
                    .filter(|c| **c == Some(AttendanceStatus::Present))
                    .count();
                let absent = cells
                    .iter()
                    .filter(|c| **c == Some(AttendanceStatus::Absent))
                    .count();
                let symbols = cells
                    .iter()
                    .map(|c| c.map(AttendanceStatus::symbol).unwrap_or(UNSET_SYMBOL))
                    .collect();
                MatrixRow {
                    student_id: s.id.clone(),
                    student_name: s.name.clone(),
                    cells,
                    symbols,
                    present,
                    absent,
                }
            })
            .collect();

        MonthlyMatrix {
            month,
            days_in_month: days,
            rows,
        }
    }

    pub fn monthly_totals(&self, month: MonthKey) -> MonthlyAttendance {
        let (present, absent) = self
            .by_date
            .iter()
            .filter(|(date, _)| month.contains(**date))
            .flat_map(|(_, day)| day.values())
            .fold((0, 0), |(p, a), s| match s {
                AttendanceStatus::Present => (p + 1, a),
                AttendanceStatus::Absent => (p, a + 1),
            });
        MonthlyAttendance {
            month,
            present,
            absent,
        }
    }

    pub fn trailing_totals(&self, months: usize, now: MonthKey) -> Vec<MonthlyAttendance> {
        now.trailing(months)
            .into_iter()
            .map(|m| self.monthly_totals(m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn student(id: &str) -> Student {
        serde_json::from_value(serde_json::json!({ "id": id, "name": format!("Name {}", id) }))
            .unwrap()
    }

    #[test]
    fn last_write_wins_per_date_and_student() {
        let mut idx = AttendanceIndex::default();
        let d = date(2024, 3, 1);
        idx.set_status(d, "s1", AttendanceStatus::Present);
        idx.bulk_set_statuses(d, [("s1", AttendanceStatus::Absent), ("s2", AttendanceStatus::Present)]);
        assert_eq!(idx.status_on(d, "s1"), Some(AttendanceStatus::Absent));
        assert_eq!(idx.count_by_status(d, AttendanceStatus::Present), 1);
        assert_eq!(idx.count_by_status(d, AttendanceStatus::Absent), 1);
    }

    #[test]
    fn unrecorded_date_is_empty() {
        let idx = AttendanceIndex::default();
        let d = date(2024, 3, 2);
        assert!(idx.day(d).is_empty());
        assert_eq!(idx.status_on(d, "s1"), None);
        assert_eq!(idx.count_by_status(d, AttendanceStatus::Present), 0);
    }

    #[test]
    fn matrix_for_thirty_day_month_with_single_record() {
        let mut idx = AttendanceIndex::default();
        idx.set_status(date(2024, 6, 5), "x", AttendanceStatus::Present);
        let x = student("x");
        let y = student("y");
        let m = idx.monthly_matrix(&[&x, &y], MonthKey::new(2024, 6).unwrap());

        assert_eq!(m.days_in_month, 30);
        let row = &m.rows[0];
        assert_eq!(row.cells.len(), 30);
        assert_eq!(row.present, 1);
        assert_eq!(row.absent, 0);
        for (i, sym) in row.symbols.iter().enumerate() {
            if i == 4 {
                assert_eq!(*sym, "✔");
            } else {
                assert_eq!(*sym, "-");
            }
        }
        assert_eq!(m.rows[1].present, 0);
        assert!(m.rows[1].symbols.iter().all(|s| *s == "-"));
    }

    #[test]
    fn matrix_handles_short_and_long_months() {
        let mut idx = AttendanceIndex::default();
        idx.set_status(date(2024, 2, 29), "x", AttendanceStatus::Absent);
        idx.set_status(date(2024, 3, 31), "x", AttendanceStatus::Present);
        let x = student("x");

        let feb = idx.monthly_matrix(&[&x], MonthKey::new(2024, 2).unwrap());
        assert_eq!(feb.days_in_month, 29);
        assert_eq!(feb.rows[0].absent, 1);
        assert_eq!(feb.rows[0].symbols[28], "✖");

        let feb23 = idx.monthly_matrix(&[&x], MonthKey::new(2023, 2).unwrap());
        assert_eq!(feb23.rows[0].cells.len(), 28);

        let mar = idx.monthly_matrix(&[&x], MonthKey::new(2024, 3).unwrap());
        assert_eq!(mar.rows[0].cells.len(), 31);
        assert_eq!(mar.rows[0].present, 1);

        let empty = idx.monthly_matrix(&[], MonthKey::new(2024, 3).unwrap());
        assert!(empty.rows.is_empty());
    }

    #[test]
    fn monthly_totals_and_student_removal() {
        let mut idx = AttendanceIndex::rebuild(&[
            AttendanceEvent {
                date: date(2024, 5, 1),
                student_id: "a".into(),
                status: AttendanceStatus::Present,
            },
            AttendanceEvent {
                date: date(2024, 5, 2),
                student_id: "b".into(),
                status: AttendanceStatus::Absent,
            },
            AttendanceEvent {
                date: date(2024, 4, 30),
                student_id: "a".into(),
                status: AttendanceStatus::Present,
            },
        ]);
        let may = MonthKey::new(2024, 5).unwrap();
        assert_eq!(idx.monthly_totals(may).present, 1);
        assert_eq!(idx.monthly_totals(may).absent, 1);

        let series = idx.trailing_totals(2, may);
        assert_eq!(series[0].month, MonthKey::new(2024, 4).unwrap());
        assert_eq!(series[0].present, 1);

        idx.remove_student("b");
        assert_eq!(idx.monthly_totals(may).absent, 0);
        assert!(idx.day(date(2024, 5, 2)).is_empty());
    }
}
