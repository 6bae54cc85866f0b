use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Assessment category. Every raw row must land in one of these to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkType {
    Formative,
    SmallSummative,
    LargeSummative,
}

struct WorkTypeMarkers {
    work_type: WorkType,
    // Matched anywhere in the lowercased label.
    substrings: &'static [&'static str],
    // Short abbreviations; matched only as whole words so they don't fire inside longer words.
    tokens: &'static [&'static str],
}

// Checked in order: "summative small (term 2)" must resolve to small before
// the large markers see "term".
const WORK_TYPE_MARKERS: [WorkTypeMarkers; 3] = [
    WorkTypeMarkers {
        work_type: WorkType::Formative,
        substrings: &["formative", "форматив", "қалыптастырушы"],
        tokens: &["fo", "фо", "қб"],
    },
    WorkTypeMarkers {
        work_type: WorkType::SmallSummative,
        substrings: &[
            "small",
            "unit summative",
            "section summative",
            "за раздел",
            "бөлім",
        ],
        tokens: &["sor", "сор", "бжб"],
    },
    WorkTypeMarkers {
        work_type: WorkType::LargeSummative,
        substrings: &[
            "large",
            "term summative",
            "quarter summative",
            "за четверть",
            "тоқсан",
        ],
        tokens: &["soch", "соч", "тжб"],
    },
];

impl WorkType {
    pub const ALL: [WorkType; 3] = [
        WorkType::Formative,
        WorkType::SmallSummative,
        WorkType::LargeSummative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkType::Formative => "formative",
            WorkType::SmallSummative => "smallSummative",
            WorkType::LargeSummative => "largeSummative",
        }
    }

    pub fn default_weight(self) -> f64 {
        match self {
            WorkType::Formative => 0.25,
            WorkType::SmallSummative => 0.25,
            WorkType::LargeSummative => 0.50,
        }
    }

    /// Case-insensitive bucket lookup for a free-text category label.
    pub fn classify(label: &str) -> Option<WorkType> {
        let lowered = label.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        WORK_TYPE_MARKERS
            .iter()
            .find(|m| {
                m.substrings.iter().any(|s| lowered.contains(s))
                    || m.tokens.iter().any(|t| words.contains(t))
            })
            .map(|m| m.work_type)
    }
}

/// Per-bucket weights. Buckets without an explicit entry use the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeightConfig {
    explicit: BTreeMap<WorkType, f64>,
}

impl WeightConfig {
    #[cfg(test)]
    pub fn with_weight(mut self, work_type: WorkType, weight: f64) -> Self {
        self.set(work_type, weight);
        self
    }

    /// Ignores weights outside [0, 1]; the bucket keeps its previous value.
    pub fn set(&mut self, work_type: WorkType, weight: f64) -> bool {
        if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
            return false;
        }
        self.explicit.insert(work_type, weight);
        true
    }

    pub fn weight(&self, work_type: WorkType) -> f64 {
        self.explicit
            .get(&work_type)
            .copied()
            .unwrap_or_else(|| work_type.default_weight())
    }

    pub fn is_explicit(&self, work_type: WorkType) -> bool {
        self.explicit.contains_key(&work_type)
    }
}

/// Minimum final percentages for grades 5, 4 and 3. Anything below the last
/// boundary is a 2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleThresholds {
    excellent: f64,
    good: f64,
    satisfactory: f64,
}

impl Default for ScaleThresholds {
    fn default() -> Self {
        Self {
            excellent: 85.0,
            good: 70.0,
            satisfactory: 55.0,
        }
    }
}

impl ScaleThresholds {
    pub fn new(excellent: f64, good: f64, satisfactory: f64) -> Result<Self, EngineError> {
        for (name, v) in [
            ("excellent", excellent),
            ("good", good),
            ("satisfactory", satisfactory),
        ] {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(EngineError::InvalidScale(format!(
                    "{} must be a percentage in [0, 100]",
                    name
                )));
            }
        }
        if !(excellent > good && good > satisfactory) {
            return Err(EngineError::InvalidScale(
                "boundaries must be strictly descending (excellent > good > satisfactory)"
                    .to_string(),
            ));
        }
        Ok(Self {
            excellent,
            good,
            satisfactory,
        })
    }

    /// Lowest percent that still earns `grade`. Grade 2 has no floor.
    pub fn grade_floor(&self, grade: u8) -> f64 {
        match grade {
            5 => self.excellent,
            4 => self.good,
            3 => self.satisfactory,
            _ => 0.0,
        }
    }

    pub fn grade_for(&self, percent: f64) -> u8 {
        if percent >= self.excellent {
            5
        } else if percent >= self.good {
            4
        } else if percent >= self.satisfactory {
            3
        } else {
            2
        }
    }
}

/// One uploaded assessment row after ingestion validation. Either `percent`
/// or the `score`/`max_score` pair carries the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAssessmentRecord {
    pub student_id: String,
    pub subject_id: String,
    pub term_id: String,
    pub class_id: Option<String>,
    pub work_type: String,
    pub percent: Option<f64>,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGradeRecord {
    pub student_id: String,
    pub subject_id: String,
    pub term_id: String,
    pub class_id: Option<String>,
    pub percent: f64,
    pub grade: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StudentStatus {
    Excellent,
    Good,
    Satisfactory,
    Failing,
}

impl StudentStatus {
    pub const ALL: [StudentStatus; 4] = [
        StudentStatus::Excellent,
        StudentStatus::Good,
        StudentStatus::Satisfactory,
        StudentStatus::Failing,
    ];

    /// Status implied by the worst grade a student has in a term.
    pub fn from_worst_grade(grade: u8) -> Self {
        match grade {
            0..=2 => StudentStatus::Failing,
            3 => StudentStatus::Satisfactory,
            4 => StudentStatus::Good,
            _ => StudentStatus::Excellent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StudentStatus::Excellent => "excellent",
            StudentStatus::Good => "good",
            StudentStatus::Satisfactory => "satisfactory",
            StudentStatus::Failing => "failing",
        }
    }
}

/// (student_id, term_id)
pub type StatusKey = (String, String);
pub type StatusMap = BTreeMap<StatusKey, StudentStatus>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub student_id: String,
    pub class_id: String,
    pub term_id: Option<String>,
}

/// `term_id: None` means the assignment holds for every term.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingAssignment {
    pub teacher_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub term_id: Option<String>,
}

impl TeachingAssignment {
    pub fn covers(&self, class_id: &str, subject_id: &str, term_id: &str) -> bool {
        self.class_id == class_id
            && self.subject_id == subject_id
            && self.term_id.as_deref().map(|t| t == term_id).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub class_id: Option<String>,
    pub term_id: String,
    pub present: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTables {
    pub students: Vec<Student>,
    pub teachers: Vec<NamedRef>,
    pub classes: Vec<NamedRef>,
    pub subjects: Vec<NamedRef>,
    pub terms: Vec<NamedRef>,
    pub enrollments: Vec<Enrollment>,
    pub assignments: Vec<TeachingAssignment>,
    pub attendance: Vec<AttendanceRecord>,
}

/// Everything one data load provides, already typed.
#[derive(Debug, Clone, Default)]
pub struct RawTables {
    pub reference: ReferenceTables,
    pub assessments: Vec<RawAssessmentRecord>,
    pub weights: WeightConfig,
    pub scale: ScaleThresholds,
}

/// Resolves a student's class when a row doesn't name one. A term-specific
/// enrollment wins over a term-less one, which wins over the student roster.
#[derive(Debug, Default)]
pub struct EnrollmentIndex {
    by_term: HashMap<(String, String), String>,
    any_term: HashMap<String, String>,
}

impl EnrollmentIndex {
    pub fn build(reference: &ReferenceTables) -> Self {
        let mut idx = EnrollmentIndex::default();
        for s in &reference.students {
            if let Some(c) = &s.class_id {
                idx.any_term.insert(s.id.clone(), c.clone());
            }
        }
        for e in &reference.enrollments {
            match &e.term_id {
                Some(t) => {
                    idx.by_term
                        .entry((e.student_id.clone(), t.clone()))
                        .or_insert_with(|| e.class_id.clone());
                }
                None => {
                    idx.any_term
                        .insert(e.student_id.clone(), e.class_id.clone());
                }
            }
        }
        idx
    }

    pub fn class_of(&self, student_id: &str, term_id: &str) -> Option<&str> {
        self.by_term
            .get(&(student_id.to_string(), term_id.to_string()))
            .or_else(|| self.any_term.get(student_id))
            .map(|s| s.as_str())
    }
}

/// Numeric prefix of a class display name: "11 B" is grade level 11.
pub fn parse_grade_level(class_name: &str) -> Option<i64> {
    let digits: String = class_name
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_type_labels_resolve_case_insensitively() {
        assert_eq!(WorkType::classify("Formative"), Some(WorkType::Formative));
        assert_eq!(
            WorkType::classify("SUMMATIVE-SMALL"),
            Some(WorkType::SmallSummative)
        );
        assert_eq!(
            WorkType::classify("summative-large"),
            Some(WorkType::LargeSummative)
        );
        assert_eq!(WorkType::classify("СОР 2"), Some(WorkType::SmallSummative));
        assert_eq!(WorkType::classify("СОЧ"), Some(WorkType::LargeSummative));
        assert_eq!(
            WorkType::classify("summative small (term 2)"),
            Some(WorkType::SmallSummative)
        );
    }

    #[test]
    fn unknown_work_type_labels_are_rejected() {
        assert_eq!(WorkType::classify(""), None);
        assert_eq!(WorkType::classify("homework"), None);
        assert_eq!(WorkType::classify("summative"), None);
        // Abbreviation inside a longer word is not a match.
        assert_eq!(WorkType::classify("сорт"), None);
    }

    #[test]
    fn weights_fall_back_to_defaults() {
        let w = WeightConfig::default().with_weight(WorkType::Formative, 0.4);
        assert_eq!(w.weight(WorkType::Formative), 0.4);
        assert_eq!(w.weight(WorkType::SmallSummative), 0.25);
        assert_eq!(w.weight(WorkType::LargeSummative), 0.50);

        let mut w = WeightConfig::default();
        assert!(!w.set(WorkType::LargeSummative, 1.5));
        assert!(!w.set(WorkType::LargeSummative, f64::NAN));
        assert!(!w.is_explicit(WorkType::LargeSummative));
        assert_eq!(w.weight(WorkType::LargeSummative), 0.50);
    }

    #[test]
    fn default_scale_maps_reference_boundaries() {
        let s = ScaleThresholds::default();
        assert_eq!(s.grade_for(100.0), 5);
        assert_eq!(s.grade_for(85.0), 5);
        assert_eq!(s.grade_for(84.99), 4);
        assert_eq!(s.grade_for(70.0), 4);
        assert_eq!(s.grade_for(55.0), 3);
        assert_eq!(s.grade_for(54.9), 2);
        assert_eq!(s.grade_for(0.0), 2);
    }

    #[test]
    fn scale_requires_strictly_descending_boundaries() {
        assert!(ScaleThresholds::new(90.0, 75.0, 50.0).is_ok());
        assert!(ScaleThresholds::new(70.0, 70.0, 50.0).is_err());
        assert!(ScaleThresholds::new(50.0, 70.0, 85.0).is_err());
        assert!(ScaleThresholds::new(120.0, 70.0, 50.0).is_err());

        let custom = ScaleThresholds::new(90.0, 75.0, 50.0).expect("valid scale");
        assert_eq!(custom.grade_for(88.0), 4);
        assert_eq!(custom.grade_for(50.0), 3);
    }

    #[test]
    fn worst_grade_maps_to_status() {
        assert_eq!(StudentStatus::from_worst_grade(2), StudentStatus::Failing);
        assert_eq!(
            StudentStatus::from_worst_grade(3),
            StudentStatus::Satisfactory
        );
        assert_eq!(StudentStatus::from_worst_grade(4), StudentStatus::Good);
        assert_eq!(StudentStatus::from_worst_grade(5), StudentStatus::Excellent);
    }

    #[test]
    fn grade_level_comes_from_numeric_prefix() {
        assert_eq!(parse_grade_level("11 B"), Some(11));
        assert_eq!(parse_grade_level("7А"), Some(7));
        assert_eq!(parse_grade_level("  9"), Some(9));
        assert_eq!(parse_grade_level("B11"), None);
        assert_eq!(parse_grade_level("Staff room"), None);
    }

    #[test]
    fn enrollment_index_prefers_term_specific_rows() {
        let reference = ReferenceTables {
            students: vec![Student {
                id: "s1".into(),
                name: "Student One".into(),
                class_id: Some("c-roster".into()),
            }],
            enrollments: vec![
                Enrollment {
                    student_id: "s1".into(),
                    class_id: "c-q2".into(),
                    term_id: Some("q2".into()),
                },
                Enrollment {
                    student_id: "s1".into(),
                    class_id: "c-any".into(),
                    term_id: None,
                },
            ],
            ..Default::default()
        };
        let idx = EnrollmentIndex::build(&reference);
        assert_eq!(idx.class_of("s1", "q2"), Some("c-q2"));
        assert_eq!(idx.class_of("s1", "q1"), Some("c-any"));
        assert_eq!(idx.class_of("s2", "q1"), None);
    }
}
