use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CoreError, Result};
use crate::model::Student;
use crate::persistence::EntityKind;

pub const UNIT_COUNT: u8 = 30;
pub const PAGES_PER_UNIT: u8 = 20;

pub fn validate_unit(unit: u8) -> Result<()> {
    if (1..=UNIT_COUNT).contains(&unit) {
        Ok(())
    } else {
        Err(CoreError::validation(format!(
            "unit must be between 1 and {}, got {}",
            UNIT_COUNT, unit
        )))
    }
}

pub fn validate_page(page: u8) -> Result<()> {
    if (1..=PAGES_PER_UNIT).contains(&page) {
        Ok(())
    } else {
        Err(CoreError::validation(format!(
            "page must be between 1 and {}, got {}",
            PAGES_PER_UNIT, page
        )))
    }
}

/// Completed pages per unit. Sets are ordered, so pages always read ascending.
///
/// Every unit and page held is in range. Stored maps are decoded leniently:
/// entries that are malformed or out of range are dropped with a warning
/// instead of failing the whole record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Progress(BTreeMap<u8, BTreeSet<u8>>);

impl<'de> Deserialize<'de> for Progress {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(d)?;
        let (progress, dropped) = Progress::from_stored(raw);
        if dropped > 0 {
            tracing::warn!(dropped, "dropped out-of-range progress entries");
        }
        Ok(progress)
    }
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `from..=to` in `unit`. Returns how many pages were newly added.
    pub fn mark_range(&mut self, unit: u8, from: u8, to: u8) -> Result<usize> {
        validate_unit(unit)?;
        validate_page(from)?;
        validate_page(to)?;
        if to < from {
            return Err(CoreError::validation(format!(
                "end page {} is before start page {}",
                to, from
            )));
        }
        let pages = self.0.entry(unit).or_default();
        let before = pages.len();
        pages.extend(from..=to);
        Ok(pages.len() - before)
    }

    /// Flips one page. Returns true when the page is now completed.
    pub fn toggle_page(&mut self, unit: u8, page: u8) -> Result<bool> {
        validate_unit(unit)?;
        validate_page(page)?;
        let pages = self.0.entry(unit).or_default();
        let now_set = if pages.remove(&page) {
            false
        } else {
            pages.insert(page);
            true
        };
        if pages.is_empty() {
            self.0.remove(&unit);
        }
        Ok(now_set)
    }

    pub fn completed_count(&self, unit: u8) -> usize {
        self.0.get(&unit).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn total_completed(&self) -> usize {
        (1..=UNIT_COUNT).map(|u| self.completed_count(u)).sum()
    }

    pub fn pages(&self, unit: u8) -> Vec<u8> {
        self.0
            .get(&unit)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Keeps the valid part of a stored `{unit: [pages]}` map. Returns the
    /// progress and how many entries were dropped.
    fn from_stored(raw: BTreeMap<String, serde_json::Value>) -> (Self, usize) {
        let mut progress = Progress::new();
        let mut dropped = 0;
        for (key, value) in raw {
            let unit = key
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|u| validate_unit(*u).is_ok());
            let pages = match value {
                serde_json::Value::Array(pages) => pages,
                _ => {
                    dropped += 1;
                    continue;
                }
            };
            let Some(unit) = unit else {
                dropped += pages.len().max(1);
                continue;
            };
            let mut kept = BTreeSet::new();
            for page in pages {
                match page
                    .as_u64()
                    .and_then(|p| u8::try_from(p).ok())
                    .filter(|p| validate_page(*p).is_ok())
                {
                    Some(p) => {
                        kept.insert(p);
                    }
                    None => dropped += 1,
                }
            }
            if !kept.is_empty() {
                progress.0.insert(unit, kept);
            }
        }
        (progress, dropped)
    }
}

/// Per-student progress, derived from student records.
#[derive(Debug, Default)]
pub struct ProgressIndex {
    by_student: HashMap<String, Progress>,
}

impl ProgressIndex {
    pub fn rebuild<'a>(students: impl IntoIterator<Item = &'a Student>) -> Self {
        let mut by_student = HashMap::new();
        for s in students {
            by_student.insert(s.id.clone(), s.progress.clone());
        }
        ProgressIndex { by_student }
    }

    pub fn get(&self, student_id: &str) -> Option<&Progress> {
        self.by_student.get(student_id)
    }

    /// A copy of the student's progress to mutate before persisting.
    pub fn staged(&self, student_id: &str) -> Result<Progress> {
        self.by_student
            .get(student_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(EntityKind::Student, student_id))
    }

    pub fn commit(&mut self, student_id: &str, progress: Progress) {
        self.by_student.insert(student_id.to_string(), progress);
    }

    pub fn remove(&mut self, student_id: &str) {
        self.by_student.remove(student_id);
    }

    /// Marks a range on a copy of the student's progress. The index itself
    /// changes only on [`commit`](Self::commit).
    pub fn stage_mark_range(
        &self,
        student_id: &str,
        unit: u8,
        from: u8,
        to: u8,
    ) -> Result<(Progress, usize)> {
        let mut next = self.staged(student_id)?;
        let added = next.mark_range(unit, from, to)?;
        Ok((next, added))
    }

    pub fn stage_toggle_page(&self, student_id: &str, unit: u8, page: u8) -> Result<(Progress, bool)> {
        let mut next = self.staged(student_id)?;
        let now_set = next.toggle_page(unit, page)?;
        Ok((next, now_set))
    }

    pub fn completed_count(&self, student_id: &str, unit: u8) -> usize {
        self.get(student_id)
            .map(|p| p.completed_count(unit))
            .unwrap_or(0)
    }

    pub fn total_completed(&self, student_id: &str) -> usize {
        self.get(student_id)
            .map(Progress::total_completed)
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn index_with(ids: &[&str]) -> ProgressIndex {
        let mut idx = ProgressIndex::default();
        for id in ids {
            idx.commit(id, Progress::new());
        }
        idx
    }

    pub(crate) trait Apply {
        fn mark_range(&mut self, id: &str, unit: u8, from: u8, to: u8) -> Result<usize>;
        fn toggle_page(&mut self, id: &str, unit: u8, page: u8) -> Result<bool>;
    }

    impl Apply for ProgressIndex {
        fn mark_range(&mut self, id: &str, unit: u8, from: u8, to: u8) -> Result<usize> {
            let (next, added) = self.stage_mark_range(id, unit, from, to)?;
            self.commit(id, next);
            Ok(added)
        }

        fn toggle_page(&mut self, id: &str, unit: u8, page: u8) -> Result<bool> {
            let (next, now_set) = self.stage_toggle_page(id, unit, page)?;
            self.commit(id, next);
            Ok(now_set)
        }
    }

    #[test]
    fn mark_range_is_sorted_and_idempotent() {
        let mut idx = index_with(&["s1"]);
        assert_eq!(idx.mark_range("s1", 2, 3, 5).unwrap(), 3);
        assert_eq!(idx.get("s1").unwrap().pages(2), vec![3, 4, 5]);
        assert_eq!(idx.mark_range("s1", 2, 3, 5).unwrap(), 0);
        assert_eq!(idx.get("s1").unwrap().pages(2), vec![3, 4, 5]);

        idx.mark_range("s1", 2, 1, 1).unwrap();
        assert_eq!(idx.get("s1").unwrap().pages(2), vec![1, 3, 4, 5]);
    }

    #[test]
    fn toggle_twice_restores_original_for_every_page() {
        let mut idx = index_with(&["s1"]);
        idx.mark_range("s1", 7, 4, 9).unwrap();
        let original = idx.get("s1").unwrap().clone();
        for unit in 1..=UNIT_COUNT {
            for page in 1..=PAGES_PER_UNIT {
                idx.toggle_page("s1", unit, page).unwrap();
                idx.toggle_page("s1", unit, page).unwrap();
                assert_eq!(idx.get("s1").unwrap(), &original, "unit {} page {}", unit, page);
            }
        }
    }

    #[test]
    fn total_matches_sum_of_units() {
        let mut idx = index_with(&["s1"]);
        idx.mark_range("s1", 1, 1, 20).unwrap();
        idx.mark_range("s1", 30, 5, 6).unwrap();
        idx.toggle_page("s1", 15, 11).unwrap();
        let per_unit: usize = (1..=UNIT_COUNT).map(|u| idx.completed_count("s1", u)).sum();
        assert_eq!(idx.total_completed("s1"), per_unit);
        assert_eq!(per_unit, 23);
    }

    #[test]
    fn invalid_bounds_fail_without_changes() {
        let mut idx = index_with(&["s1"]);
        idx.mark_range("s1", 3, 1, 2).unwrap();
        let before = idx.get("s1").unwrap().clone();

        assert!(matches!(idx.mark_range("s1", 31, 1, 2), Err(CoreError::Validation(_))));
        assert!(matches!(idx.mark_range("s1", 3, 0, 2), Err(CoreError::Validation(_))));
        assert!(matches!(idx.mark_range("s1", 3, 5, 21), Err(CoreError::Validation(_))));
        assert!(matches!(idx.mark_range("s1", 3, 6, 5), Err(CoreError::Validation(_))));
        assert!(matches!(idx.toggle_page("s1", 0, 1), Err(CoreError::Validation(_))));
        assert_eq!(idx.get("s1").unwrap(), &before);
    }

    #[test]
    fn unknown_student_is_not_found() {
        let mut idx = index_with(&[]);
        assert!(matches!(
            idx.toggle_page("ghost", 1, 1),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(idx.total_completed("ghost"), 0);
    }

    #[test]
    fn stored_progress_round_trips_through_json_keys() {
        let mut p = Progress::new();
        p.mark_range(12, 2, 4).unwrap();
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v, serde_json::json!({ "12": [2, 3, 4] }));
    }

    fn student_with(raw: serde_json::Value) -> Student {
        serde_json::from_value(serde_json::json!({ "id": "s1", "name": "A", "progress": raw })).unwrap()
    }

    #[test]
    fn rebuild_drops_out_of_range_entries() {
        let student = student_with(serde_json::json!({ "1": [1, 25], "40": [2], "2": [] }));
        let idx = ProgressIndex::rebuild([&student]);
        assert_eq!(idx.get("s1").unwrap().pages(1), vec![1]);
        assert_eq!(idx.total_completed("s1"), 1);
    }

    #[test]
    fn keys_and_pages_outside_u8_are_dropped_not_fatal() {
        let raw = serde_json::json!({
            "300": [1],
            "-1": [2],
            "unit": [3],
            "5": [-4, 7, 999, "x", 8],
            "6": "not a list"
        });
        let (progress, dropped) =
            Progress::from_stored(serde_json::from_value(raw.clone()).unwrap());
        assert_eq!(progress.pages(5), vec![7, 8]);
        assert_eq!(progress.total_completed(), 2);
        assert_eq!(dropped, 7);

        let student = student_with(raw);
        assert_eq!(student.progress, progress);
    }
}
