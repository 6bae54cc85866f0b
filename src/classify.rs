use crate::model::{FinalGradeRecord, StatusMap, StudentStatus};
use std::collections::BTreeMap;

/// Assigns one status per (student, term) from the worst grade present.
///
/// A single 2 makes the whole term failing no matter how many 5s sit next to
/// it. Pairs without any final record get no entry.
pub fn classify(final_grades: &[FinalGradeRecord]) -> StatusMap {
    let mut worst: BTreeMap<(String, String), u8> = BTreeMap::new();
    for g in final_grades {
        let key = (g.student_id.clone(), g.term_id.clone());
        worst
            .entry(key)
            .and_modify(|w| *w = (*w).min(g.grade))
            .or_insert(g.grade);
    }
    worst
        .into_iter()
        .map(|(key, grade)| (key, StudentStatus::from_worst_grade(grade)))
        .collect()
}

pub fn status_of(statuses: &StatusMap, student_id: &str, term_id: &str) -> Option<StudentStatus> {
    statuses
        .get(&(student_id.to_string(), term_id.to_string()))
        .copied()
}
