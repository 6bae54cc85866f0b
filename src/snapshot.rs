use crate::aggregate::AggregateContext;
use crate::calc::{rollup, Coverage};
use crate::classify::{classify, status_of};
use crate::error::EngineError;
use crate::ingest::IngestReport;
use crate::model::{
    EnrollmentIndex, FinalGradeRecord, RawAssessmentRecord, RawTables, ReferenceTables,
    ScaleThresholds, StatusMap, StudentStatus, WeightConfig, WorkType,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The two canonical derived tables plus the counters explaining what was
/// left out of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub final_grades: Vec<FinalGradeRecord>,
    pub statuses: StatusMap,
    pub coverage: Coverage,
}

impl Derived {
    /// SHA-256 over the derived tables only. Percentages are hashed by bit
    /// pattern, so equal digests mean bit-identical output.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for g in &self.final_grades {
            hasher.update(g.student_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(g.subject_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(g.term_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(g.class_id.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"\x1f");
            hasher.update(g.percent.to_bits().to_be_bytes());
            hasher.update([g.grade, b'\n']);
        }
        hasher.update(b"\x1e");
        for ((student_id, term_id), status) in &self.statuses {
            hasher.update(student_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(term_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(status.as_str().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

fn with_class(rec: &RawAssessmentRecord, enrollments: &EnrollmentIndex) -> RawAssessmentRecord {
    let mut out = rec.clone();
    if out.class_id.is_none() {
        out.class_id = enrollments
            .class_of(&rec.student_id, &rec.term_id)
            .map(|c| c.to_string());
    }
    out
}

/// Full pipeline: normalize, roll up, classify. Always rebuilds both derived
/// tables from scratch.
///
/// An empty assessment table, or one where no row survives normalization,
/// is `MissingInputData` rather than an empty result.
pub fn recompute(raw: &RawTables) -> Result<Derived, EngineError> {
    if raw.assessments.is_empty() {
        return Err(EngineError::MissingInputData(
            "the assessments table is empty".to_string(),
        ));
    }

    let enrollments = EnrollmentIndex::build(&raw.reference);
    let records: Vec<RawAssessmentRecord> = raw
        .assessments
        .iter()
        .map(|r| with_class(r, &enrollments))
        .collect();

    let out = rollup(&records, &raw.weights, &raw.scale);
    if out.final_grades.is_empty() {
        return Err(EngineError::MissingInputData(format!(
            "none of the {} assessment rows carried a usable score and work type",
            records.len()
        )));
    }

    let statuses = classify(&out.final_grades);
    Ok(Derived {
        final_grades: out.final_grades,
        statuses,
        coverage: out.coverage,
    })
}

/// Everything queries read, computed in one go and never mutated afterwards.
/// Reloads build a new snapshot and swap it in whole.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub computed_at: String,
    pub digest: String,
    pub reference: ReferenceTables,
    pub weights: WeightConfig,
    pub scale: ScaleThresholds,
    pub final_grades: Vec<FinalGradeRecord>,
    pub statuses: StatusMap,
    pub coverage: Coverage,
    pub ingest: IngestReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCounts {
    pub students: usize,
    pub teachers: usize,
    pub classes: usize,
    pub subjects: usize,
    pub terms: usize,
    pub assignments: usize,
    pub attendance: usize,
    pub final_grades: usize,
    pub statuses: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub snapshot_id: String,
    pub computed_at: String,
    pub digest: String,
    pub counts: SnapshotCounts,
    pub coverage: Coverage,
    pub ingest: IngestReport,
    pub weights: BTreeMap<&'static str, f64>,
    /// Buckets running on the built-in weight because the load named none.
    pub defaulted_weights: Vec<&'static str>,
    pub scale: ScaleThresholds,
}

impl Snapshot {
    pub fn build(raw: RawTables, ingest: IngestReport) -> Result<Self, EngineError> {
        let derived = recompute(&raw)?;
        let digest = derived.digest();

        // Rows rejected at ingestion never reached the normalizer but still
        // count against coverage.
        let mut coverage = derived.coverage;
        let rejected = ingest.dropped("assessments");
        coverage.rows_in += rejected;
        coverage.dropped_unparseable += rejected;

        let RawTables {
            mut reference,
            weights,
            scale,
            ..
        } = raw;
        let enrollments = EnrollmentIndex::build(&reference);
        for a in reference.attendance.iter_mut() {
            if a.class_id.is_none() {
                a.class_id = enrollments
                    .class_of(&a.student_id, &a.term_id)
                    .map(|c| c.to_string());
            }
        }

        Ok(Snapshot {
            id: Uuid::new_v4().to_string(),
            computed_at: chrono::Utc::now().to_rfc3339(),
            digest,
            reference,
            weights,
            scale,
            final_grades: derived.final_grades,
            statuses: derived.statuses,
            coverage,
            ingest,
        })
    }

    pub fn context(&self) -> AggregateContext<'_> {
        AggregateContext {
            final_grades: &self.final_grades,
            statuses: &self.statuses,
            reference: &self.reference,
        }
    }

    pub fn status_of(&self, student_id: &str, term_id: &str) -> Option<StudentStatus> {
        status_of(&self.statuses, student_id, term_id)
    }

    pub fn summary(&self) -> SnapshotSummary {
        let r = &self.reference;
        SnapshotSummary {
            snapshot_id: self.id.clone(),
            computed_at: self.computed_at.clone(),
            digest: self.digest.clone(),
            counts: SnapshotCounts {
                students: r.students.len(),
                teachers: r.teachers.len(),
                classes: r.classes.len(),
                subjects: r.subjects.len(),
                terms: r.terms.len(),
                assignments: r.assignments.len(),
                attendance: r.attendance.len(),
                final_grades: self.final_grades.len(),
                statuses: self.statuses.len(),
            },
            coverage: self.coverage,
            ingest: self.ingest.clone(),
            weights: WorkType::ALL
                .iter()
                .map(|wt| (wt.as_str(), self.weights.weight(*wt)))
                .collect(),
            defaulted_weights: WorkType::ALL
                .iter()
                .filter(|wt| !self.weights.is_explicit(**wt))
                .map(|wt| wt.as_str())
                .collect(),
            scale: self.scale,
        }
    }
}
