use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, Result};
use crate::model::{ExamEvent, ExamField};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredExam {
    pub scores: BTreeMap<String, u32>,
    pub total_score: u32,
    pub max_score: u32,
}

/// Checks raw scores against the configured exam fields and totals them.
///
/// Every configured field must be scored and no other field may appear.
pub fn score_exam(fields: &[ExamField], raw: &BTreeMap<String, i64>) -> Result<ScoredExam> {
    if fields.is_empty() {
        return Err(CoreError::validation("no exam fields are configured"));
    }
    if let Some(unknown) = raw.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
        return Err(CoreError::validation(format!(
            "unknown exam field {:?}",
            unknown
        )));
    }

    let mut scores = BTreeMap::new();
    let mut total_score: u32 = 0;
    let mut max_score: u32 = 0;
    for field in fields {
        let Some(&value) = raw.get(&field.name) else {
            return Err(CoreError::validation(format!(
                "missing score for {:?}",
                field.name
            )));
        };
        if value < 0 || value > i64::from(field.max_mark) {
            return Err(CoreError::validation(format!(
                "score for {:?} must be between 0 and {}, got {}",
                field.name, field.max_mark, value
            )));
        }
        let value = value as u32;
        scores.insert(field.name.clone(), value);
        total_score = total_score.saturating_add(value);
        max_score = max_score.saturating_add(field.max_mark);
    }

    Ok(ScoredExam {
        scores,
        total_score,
        max_score,
    })
}

/// student → exams, in the order they were recorded.
#[derive(Debug, Default)]
pub struct ExamIndex {
    by_student: HashMap<String, Vec<ExamEvent>>,
}

impl ExamIndex {
    pub fn rebuild<'a>(exams: impl IntoIterator<Item = &'a ExamEvent>) -> Self {
        let mut idx = ExamIndex::default();
        for e in exams {
            idx.add(e.clone());
        }
        idx
    }

    pub fn add(&mut self, exam: ExamEvent) {
        let list = self.by_student.entry(exam.student_id.clone()).or_default();
        list.push(exam);
        list.sort_by_key(|e| e.taken_at);
    }

    pub fn for_student(&self, student_id: &str) -> &[ExamEvent] {
        self.by_student
            .get(student_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn remove_student(&mut self, student_id: &str) {
        self.by_student.remove(student_id);
    }

    pub fn all(&self) -> impl Iterator<Item = &ExamEvent> {
        self.by_student.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_student.values().map(Vec::len).sum()
    }

    /// (Σ total score, Σ max score) over every recorded exam.
    pub fn score_sums(&self) -> (u64, u64) {
        self.all().fold((0, 0), |(t, m), e| {
            (t + u64::from(e.total_score), m + u64::from(e.max_score))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Settings;
    use chrono::{TimeZone, Utc};

    fn raw(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn totals_follow_configured_fields() {
        let fields = Settings::default().exam_fields;
        let scored = score_exam(
            &fields,
            &raw(&[("Memorization", 45), ("Tajweed", 20), ("Voice", 20)]),
        )
        .unwrap();
        assert_eq!(scored.total_score, 85);
        assert_eq!(scored.max_score, 100);
        assert_eq!(scored.scores["Tajweed"], 20);
    }

    #[test]
    fn rejects_missing_unknown_and_out_of_range_scores() {
        let fields = Settings::default().exam_fields;
        let missing = score_exam(&fields, &raw(&[("Memorization", 45), ("Tajweed", 20)]));
        assert!(matches!(missing, Err(CoreError::Validation(_))));

        let unknown = score_exam(
            &fields,
            &raw(&[("Memorization", 1), ("Tajweed", 1), ("Voice", 1), ("Style", 1)]),
        );
        assert!(unknown.is_err());

        let too_high = score_exam(
            &fields,
            &raw(&[("Memorization", 51), ("Tajweed", 1), ("Voice", 1)]),
        );
        assert!(too_high.is_err());

        let negative = score_exam(
            &fields,
            &raw(&[("Memorization", -1), ("Tajweed", 1), ("Voice", 1)]),
        );
        assert!(negative.is_err());

        assert!(score_exam(&[], &raw(&[])).is_err());
    }

    #[test]
    fn index_keeps_exams_chronological_per_student() {
        let exam = |id: &str, student: &str, day: u32| ExamEvent {
            id: id.to_string(),
            student_id: student.to_string(),
            name: "Unit exam".to_string(),
            unit: 1,
            scores: BTreeMap::new(),
            total_score: 40,
            max_score: 50,
            taken_at: Utc.with_ymd_and_hms(2024, 5, day, 10, 0, 0).unwrap(),
        };
        let mut idx = ExamIndex::rebuild(&[exam("b", "s1", 9), exam("c", "s2", 1)]);
        idx.add(exam("a", "s1", 2));

        let ids: Vec<&str> = idx.for_student("s1").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.score_sums(), (120, 150));

        idx.remove_student("s1");
        assert!(idx.for_student("s1").is_empty());
        assert_eq!(idx.score_sums(), (40, 50));
    }
}
